//! Mesh Router
//!
//! Runs one router of a message-routing mesh. Service nodes connect to the
//! bound address; the router can announce itself to an existing network
//! and exposes Prometheus metrics and a health endpoint.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mesh_router::{Error, Result, RouterConfig, RouterMetrics, RouterService};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Mesh Router - filtered message routing between service nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags override its values
    #[arg(long, env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for service nodes
    #[arg(long, env = "MESH_BIND")]
    bind: Option<String>,

    /// Router id (generated when absent)
    #[arg(long, env = "MESH_ROUTER_ID")]
    id: Option<String>,

    /// Address of a router of an existing network to join
    #[arg(long, env = "MESH_JOIN")]
    join: Option<String>,

    /// Default request timeout in milliseconds
    #[arg(long, env = "MESH_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn router_config(&self) -> Result<RouterConfig> {
        let mut config = match &self.config {
            Some(path) => RouterConfig::from_yaml_file(path)?,
            None => RouterConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(id) = &self.id {
            config.id = Some(id.clone());
        }
        if let Some(join) = &self.join {
            config.join = Some(join.clone());
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.request_timeout_ms = timeout;
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics_addr = Some(addr.clone());
        }
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.router_config()?;

    info!("Starting Mesh Router");
    info!("  Version: {}", mesh_router::VERSION);
    info!("  Bind: {}", config.bind);
    info!("  Request timeout: {} ms", config.request_timeout_ms);
    info!("  Strategies: {}", config.strategies.len());

    let router = RouterService::from_config(&config)?;
    let address = router.start().await?;
    info!(router = %router.id(), address = %address, "Router started");

    if let Some(addr) = config.metrics_addr.clone() {
        let metrics = router.metrics().clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, metrics).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    if let Some(join) = &config.join {
        match router.connect_to_existing_network(join).await {
            Ok(()) => info!("Joined network through {}", join),
            Err(e) => warn!("Cannot join network through {}: {}", join, e),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    router.stop().await?;
    info!("Router shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics and Health Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: RouterMetrics) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let metrics = Arc::new(metrics);
    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let (status, body) = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok(text) => (StatusCode::OK, text),
                            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        "/healthz" | "/livez" | "/readyz" => (StatusCode::OK, "ok".to_string()),
                        _ => (StatusCode::NOT_FOUND, "not found".to_string()),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
