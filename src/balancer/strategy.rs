//! Load Balancing Strategies
//!
//! Strategy names, their options and the process-wide table mapping a
//! service name (or `"*"` for the default) to the strategy used to pick one
//! node among several candidates.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Table key of the default strategy
pub const DEFAULT_SERVICE_KEY: &str = "*";

// =============================================================================
// Strategy
// =============================================================================

/// Selection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Uniformly random choice
    #[default]
    RoundRobin,
    /// Lowest mean request latency
    LatencyOptimized,
    /// Weighted choice between semver buckets
    VersionCustomized,
    /// Same behavior as round robin until nodes report cpu load
    CpuOptimized,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "ROUND_ROBIN",
            Strategy::LatencyOptimized => "LATENCY_OPTIMIZED",
            Strategy::VersionCustomized => "VERSION_CUSTOMIZED",
            Strategy::CpuOptimized => "CPU_OPTIMIZED",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ROUND_ROBIN" => Ok(Strategy::RoundRobin),
            "LATENCY_OPTIMIZED" => Ok(Strategy::LatencyOptimized),
            "VERSION_CUSTOMIZED" => Ok(Strategy::VersionCustomized),
            "CPU_OPTIMIZED" => Ok(Strategy::CpuOptimized),
            other => Err(Error::InvalidArgument(format!(
                "unknown load balancing strategy '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Strategy Options
// =============================================================================

/// Probability of routing to the nodes whose version satisfies a range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRule {
    /// Semver range such as `^1.0.0`
    pub version: String,
    /// Probability in [0, 1]
    pub prob: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategyOptions {
    pub version_info: Vec<VersionRule>,
}

impl StrategyOptions {
    /// Check ranges and probabilities
    pub fn validate(&self) -> Result<()> {
        let mut total = 0.0;
        for rule in &self.version_info {
            VersionReq::parse(&rule.version).map_err(|e| {
                Error::InvalidArgument(format!("invalid version range '{}': {}", rule.version, e))
            })?;
            if !(0.0..=1.0).contains(&rule.prob) {
                return Err(Error::InvalidArgument(format!(
                    "probability {} for '{}' is outside [0, 1]",
                    rule.prob, rule.version
                )));
            }
            total += rule.prob;
        }
        // Tolerate float noise such as 0.7 + 0.2 + 0.1
        if total > 1.0 + 1e-9 {
            return Err(Error::InvalidArgument(format!(
                "version probabilities sum to {}, above 1",
                total
            )));
        }
        Ok(())
    }
}

/// Strategy bound to a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy: Strategy,
    #[serde(default)]
    pub options: StrategyOptions,
}

/// Administrative definition, as found in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    /// Service name; the default strategy when absent
    #[serde(default)]
    pub service: Option<String>,
    pub strategy: Strategy,
    #[serde(default)]
    pub options: StrategyOptions,
}

// =============================================================================
// Strategy Table
// =============================================================================

/// Service name -> strategy mapping with a `"*"` default
#[derive(Debug, Default)]
pub struct StrategyTable {
    entries: RwLock<HashMap<String, StrategyConfig>>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the strategy of `service`, or the default when `None`
    pub fn define(
        &self,
        service: Option<&str>,
        strategy: Strategy,
        options: StrategyOptions,
    ) -> Result<()> {
        options.validate()?;
        let key = service.unwrap_or(DEFAULT_SERVICE_KEY).to_string();
        self.entries
            .write()
            .insert(key, StrategyConfig { strategy, options });
        Ok(())
    }

    pub fn define_from(&self, definition: &StrategyDefinition) -> Result<()> {
        self.define(
            definition.service.as_deref(),
            definition.strategy,
            definition.options.clone(),
        )
    }

    /// Define from an untyped `{service?, strategy, options?}` object
    pub fn define_from_value(&self, value: &Value) -> Result<()> {
        let object = value.as_object().ok_or_else(|| {
            Error::InvalidArgument("strategy definition must be an object".into())
        })?;

        let service = match object.get("service") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.as_str()),
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "service must be a string, got {}",
                    other
                )))
            }
        };

        let strategy = match object.get("strategy") {
            Some(Value::String(name)) => name.parse::<Strategy>()?,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "strategy must be a string, got {}",
                    other.unwrap_or(&Value::Null)
                )))
            }
        };

        let options = match object.get("options") {
            None | Some(Value::Null) => StrategyOptions::default(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| Error::InvalidArgument(format!("invalid strategy options: {}", e)))?,
        };

        self.define(service, strategy, options)
    }

    /// Strategy for `service`: explicit entry, then the default, then round robin
    pub fn resolve(&self, service: Option<&str>) -> StrategyConfig {
        let entries = self.entries.read();
        service
            .and_then(|name| entries.get(name))
            .or_else(|| entries.get(DEFAULT_SERVICE_KEY))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
