//! TCP Node
//!
//! A node listens for clients on its bound address and opens links to
//! servers. Every link has a writer task fed by a bounded queue and a
//! reader that turns frames into [`TransportEvent`]s. Links carry a
//! generation so a stale link ending never removes its replacement.
//!
//! A full queue means the peer is not draining its socket: ticks and option
//! updates to it are dropped with a warning and requests fail immediately.

use super::frame::Frame;
use crate::domain::ports::{
    NodeId, NodeOptions, PeerLink, Reply, Responder, Transport, TransportEvent,
};
use crate::error::{Error, ErrorKind, RemoteError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type FrameReader = Lines<BufReader<OwnedReadHalf>>;

// =============================================================================
// Configuration
// =============================================================================

/// Link timing parameters
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bound on TCP connect and on the hello/welcome handshake
    pub connect_timeout: Duration,
    /// How long to keep trying to restore a failed server link
    pub reconnection_timeout: Duration,
    /// First delay between reconnection attempts
    pub initial_reconnect_delay: Duration,
    /// Largest delay between reconnection attempts
    pub max_reconnect_delay: Duration,
    /// Frames queued per link before sends start failing
    pub link_queue_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnection_timeout: Duration::from_secs(30),
            initial_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(5),
            link_queue_capacity: 1024,
        }
    }
}

// =============================================================================
// Links
// =============================================================================

struct Link {
    peer: NodeId,
    generation: u64,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

/// Why a reader stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    /// The peer said goodbye
    Stopped,
    /// EOF or I/O error without goodbye
    Failed,
    /// Closed from this side
    Closed,
}

/// Drain `rx` into the socket until a `Stop` is written or every sender is gone
fn spawn_writer(mut write: OwnedWriteHalf, mut rx: mpsc::Receiver<Frame>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let last = matches!(frame, Frame::Stop);
            match frame.encode() {
                Ok(line) => {
                    if let Err(e) = write.write_all(line.as_bytes()).await {
                        debug!(error = %e, "Link write failed");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Dropping unencodable frame"),
            }
            if last {
                break;
            }
        }
        let _ = write.shutdown().await;
    });
}

// =============================================================================
// TCP Node
// =============================================================================

/// [`Transport`] over TCP with line-delimited JSON frames
pub struct TcpNode {
    id: NodeId,
    config: NodeConfig,
    options: RwLock<NodeOptions>,
    bound: Mutex<Option<String>>,
    /// Accepted links, by client id
    clients: DashMap<NodeId, Link>,
    /// Orders client link installs against client link teardown
    client_turn: Mutex<()>,
    /// Opened links, by server address
    servers: DashMap<String, Link>,
    /// Outstanding requests and the peer they were sent to
    pending: DashMap<u64, (NodeId, oneshot::Sender<Reply>)>,
    next_request: AtomicU64,
    next_generation: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
    me: Weak<TcpNode>,
}

impl std::fmt::Debug for TcpNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpNode")
            .field("id", &self.id)
            .field("clients", &self.clients.len())
            .field("servers", &self.servers.len())
            .finish()
    }
}

impl TcpNode {
    /// Create a node and the receiver of its events
    pub fn new(
        id: NodeId,
        options: NodeOptions,
        config: NodeConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let node = Arc::new_cyclic(|me| Self {
            id,
            config,
            options: RwLock::new(options),
            bound: Mutex::new(None),
            clients: DashMap::new(),
            client_turn: Mutex::new(()),
            servers: DashMap::new(),
            pending: DashMap::new(),
            next_request: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            connect_lock: tokio::sync::Mutex::new(()),
            events,
            shutdown: CancellationToken::new(),
            me: me.clone(),
        });
        (node, rx)
    }

    /// Address returned by the last successful [`Transport::bind`]
    pub fn bound_address(&self) -> Option<String> {
        self.bound.lock().clone()
    }

    /// Ids of the clients currently linked
    pub fn clients(&self) -> Vec<NodeId> {
        self.clients.iter().map(|link| link.key().clone()).collect()
    }

    fn me(&self) -> Result<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| Error::Internal("transport dropped".into()))
    }

    fn emit(&self, event: TransportEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            trace!(node = %self.id, event = name, "No listener for transport event");
        }
    }

    fn link_sender(&self, to: &NodeId) -> Result<mpsc::Sender<Frame>> {
        if let Some(link) = self.clients.get(to) {
            return Ok(link.tx.clone());
        }
        self.servers
            .iter()
            .find(|link| &link.peer == to)
            .map(|link| link.tx.clone())
            .ok_or_else(|| Error::Transport(format!("no link to node {}", to)))
    }

    /// Queue `frame` on a link without waiting for room
    fn enqueue(&self, to: &NodeId, tx: &mpsc::Sender<Frame>, frame: Frame) -> Result<()> {
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(node = %self.id, peer = %to, frame = frame.kind(), "Link queue full, dropping frame");
                Err(Error::Transport(format!("link queue to {} is full", to)))
            }
            Err(TrySendError::Closed(_)) => {
                Err(Error::Transport(format!("link to {} is closed", to)))
            }
        }
    }

    /// Drop the reply slots of requests sent to `peer`; their waiters fail
    fn fail_pending(&self, peer: &NodeId) {
        self.pending.retain(|_, (owner, _)| owner != peer);
    }

    // =========================================================================
    // Server Side
    // =========================================================================

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            let address = address.to_string();
                            if let Err(e) = node.serve_client(stream, address.clone()).await {
                                debug!(address = %address, error = %e, "Client link ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(node = %self.id, error = %e, "Accept failed"),
                },
            }
        }
        debug!(node = %self.id, "Accept loop stopped");
    }

    async fn serve_client(self: Arc<Self>, stream: TcpStream, address: String) -> Result<()> {
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let hello = tokio::time::timeout(self.config.connect_timeout, lines.next_line())
            .await
            .map_err(|_| Error::Transport(format!("handshake with {} timed out", address)))??;
        let (peer, options) = match hello.as_deref().map(Frame::decode).transpose()? {
            Some(Frame::Hello { id, options }) => (id, options),
            _ => {
                return Err(Error::Transport(format!(
                    "{} did not open with hello",
                    address
                )))
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.link_queue_capacity.max(1));
        spawn_writer(write, rx);
        let _ = tx.try_send(Frame::Welcome {
            id: self.id.clone(),
        });

        let cancel = self.shutdown.child_token();
        let link = Link {
            peer: peer.clone(),
            generation,
            tx: tx.clone(),
            cancel: cancel.clone(),
        };
        {
            let _turn = self.client_turn.lock();
            if let Some(previous) = self.clients.insert(peer.clone(), link) {
                previous.cancel.cancel();
            }
            debug!(node = %self.id, client = %peer, address = %address, "Client connected");
            self.emit(TransportEvent::ClientConnected {
                id: peer.clone(),
                address: address.clone(),
                options,
            });
        }

        let end = self.read_loop(&mut lines, &peer, &tx, &cancel).await;

        // Removal and the closing event happen in one turn so a replacement
        // link with the same id is announced strictly after it
        let _turn = self.client_turn.lock();
        let current = self
            .clients
            .remove_if(&peer, |_, link| link.generation == generation)
            .is_some();
        if !current || self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.fail_pending(&peer);

        match end {
            LinkEnd::Stopped => self.emit(TransportEvent::ClientStop { id: peer, address }),
            LinkEnd::Failed | LinkEnd::Closed => {
                warn!(node = %self.id, client = %peer, "Client link failed");
                self.emit(TransportEvent::ClientFailure { id: peer, address })
            }
        }
        Ok(())
    }

    // =========================================================================
    // Client Side
    // =========================================================================

    /// Dial `address` and complete the handshake
    async fn open(&self, address: &str) -> Result<(FrameReader, OwnedWriteHalf, NodeId)> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Transport(format!("connect to {} timed out", address)))??;
        stream.set_nodelay(true)?;
        let (read, mut write) = stream.into_split();

        let hello = Frame::Hello {
            id: self.id.clone(),
            options: self.options(),
        };
        write.write_all(hello.encode()?.as_bytes()).await?;

        let mut lines = BufReader::new(read).lines();
        let welcome = tokio::time::timeout(self.config.connect_timeout, lines.next_line())
            .await
            .map_err(|_| Error::Transport(format!("handshake with {} timed out", address)))??;
        match welcome.as_deref().map(Frame::decode).transpose()? {
            Some(Frame::Welcome { id }) => Ok((lines, write, id)),
            _ => Err(Error::Transport(format!(
                "{} did not answer with welcome",
                address
            ))),
        }
    }

    /// Register a server link and spawn its reader
    fn install_server_link(
        self: &Arc<Self>,
        address: String,
        peer: NodeId,
        lines: FrameReader,
        write: OwnedWriteHalf,
    ) -> PeerLink {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.link_queue_capacity.max(1));
        spawn_writer(write, rx);

        let cancel = self.shutdown.child_token();
        self.servers.insert(
            address.clone(),
            Link {
                peer: peer.clone(),
                generation,
                tx: tx.clone(),
                cancel: cancel.clone(),
            },
        );

        let node = self.clone();
        let link = PeerLink {
            id: peer.clone(),
            address: address.clone(),
        };
        tokio::spawn(node.run_server_link(address, peer, generation, lines, tx, cancel));
        link
    }

    async fn run_server_link(
        self: Arc<Self>,
        address: String,
        peer: NodeId,
        generation: u64,
        mut lines: FrameReader,
        tx: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    ) {
        let end = self.read_loop(&mut lines, &peer, &tx, &cancel).await;
        drop(tx);

        let current = self
            .servers
            .remove_if(&address, |_, link| link.generation == generation)
            .is_some();
        self.fail_pending(&peer);
        if !current || self.shutdown.is_cancelled() {
            return;
        }

        match end {
            LinkEnd::Stopped => {
                info!(node = %self.id, server = %peer, address = %address, "Server stopped");
                self.emit(TransportEvent::ServerStop { id: peer, address });
            }
            LinkEnd::Failed | LinkEnd::Closed => {
                warn!(node = %self.id, server = %peer, address = %address, "Server link failed");
                self.emit(TransportEvent::ServerFailure {
                    id: peer,
                    address: address.clone(),
                });
                self.reconnect(address).await;
            }
        }
    }

    /// Retry a failed server with exponential backoff
    async fn reconnect(self: Arc<Self>, address: String) {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_reconnect_delay)
            .with_max_interval(self.config.max_reconnect_delay)
            .with_max_elapsed_time(Some(self.config.reconnection_timeout))
            .build();

        let dialer = self.clone();
        let target = address.clone();
        let attempt = move || {
            let node = dialer.clone();
            let address = target.clone();
            async move {
                if node.shutdown.is_cancelled() {
                    return Err(backoff::Error::permanent(Error::Transport(
                        "node stopped".into(),
                    )));
                }
                node.open(&address).await.map_err(|e| {
                    debug!(address = %address, error = %e, "Reconnection attempt failed");
                    backoff::Error::transient(e)
                })
            }
        };

        match backoff::future::retry(policy, attempt).await {
            Ok((lines, write, peer)) if !self.shutdown.is_cancelled() => {
                let link = self.install_server_link(address, peer, lines, write);
                info!(node = %self.id, server = %link.id, address = %link.address, "Server link restored");
                self.emit(TransportEvent::ServerReconnect {
                    id: link.id,
                    address: link.address,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(node = %self.id, address = %address, error = %e, "Giving up reconnection");
                self.emit(TransportEvent::ServerReconnectFailure { address });
            }
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    async fn read_loop(
        &self,
        lines: &mut FrameReader,
        peer: &NodeId,
        tx: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
    ) -> LinkEnd {
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return LinkEnd::Closed,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match Frame::decode(&line) {
                    Ok(Frame::Stop) => return LinkEnd::Stopped,
                    Ok(frame) => self.on_frame(peer, tx, frame),
                    Err(e) => warn!(node = %self.id, peer = %peer, error = %e, "Ignoring frame"),
                },
                Ok(None) => return LinkEnd::Failed,
                Err(e) => {
                    debug!(node = %self.id, peer = %peer, error = %e, "Link read failed");
                    return LinkEnd::Failed;
                }
            }
        }
    }

    fn on_frame(&self, peer: &NodeId, tx: &mpsc::Sender<Frame>, frame: Frame) {
        match frame {
            Frame::Options { options } => self.emit(TransportEvent::OptionsSync {
                id: peer.clone(),
                options,
            }),
            Frame::Tick { event, data } => self.emit(TransportEvent::Tick {
                from: peer.clone(),
                event,
                data,
            }),
            Frame::Request {
                request_id,
                event,
                data,
            } => {
                let (responder, rx) = Responder::channel();
                self.emit(TransportEvent::Request {
                    from: peer.clone(),
                    event: event.clone(),
                    data,
                    responder,
                });
                let tx = tx.clone();
                tokio::spawn(async move {
                    let frame = match rx.await {
                        Ok(Ok(data)) => Frame::Reply { request_id, data },
                        Ok(Err(error)) => Frame::ReplyError { request_id, error },
                        Err(_) => Frame::ReplyError {
                            request_id,
                            error: RemoteError {
                                kind: ErrorKind::Internal,
                                message: format!("request '{}' dropped without a reply", event),
                            },
                        },
                    };
                    // Replies wait for room; the requester is already waiting on them
                    let _ = tx.send(frame).await;
                });
            }
            Frame::Reply { request_id, data } => self.settle(request_id, Ok(data)),
            Frame::ReplyError { request_id, error } => self.settle(request_id, Err(error)),
            Frame::Hello { .. } | Frame::Welcome { .. } | Frame::Stop => {
                debug!(node = %self.id, peer = %peer, "Ignoring out of place handshake frame")
            }
        }
    }

    fn settle(&self, request_id: u64, reply: Reply) {
        match self.pending.remove(&request_id) {
            Some((_, (_, waiter))) => {
                let _ = waiter.send(reply);
            }
            None => debug!(node = %self.id, request_id, "Discarding late reply"),
        }
    }
}

#[async_trait]
impl Transport for TcpNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn options(&self) -> NodeOptions {
        self.options.read().clone()
    }

    async fn set_options(&self, options: NodeOptions) -> Result<()> {
        *self.options.write() = options.clone();
        for link in self.servers.iter() {
            let frame = Frame::Options {
                options: options.clone(),
            };
            let _ = self.enqueue(&link.peer, &link.tx, frame);
        }
        Ok(())
    }

    async fn bind(&self, address: &str) -> Result<String> {
        let listener = TcpListener::bind(address).await?;
        let local = listener.local_addr()?.to_string();
        *self.bound.lock() = Some(local.clone());

        info!(node = %self.id, address = %local, "Listening");
        tokio::spawn(self.me()?.accept_loop(listener));
        Ok(local)
    }

    async fn connect(&self, address: &str) -> Result<PeerLink> {
        let _guard = self.connect_lock.lock().await;
        if let Some(link) = self.servers.get(address) {
            return Ok(PeerLink {
                id: link.peer.clone(),
                address: address.to_string(),
            });
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::Transport("node stopped".into()));
        }

        let (lines, write, peer) = self.open(address).await?;
        let link = self
            .me()?
            .install_server_link(address.to_string(), peer, lines, write);
        debug!(node = %self.id, server = %link.id, address = %address, "Connected to server");
        self.emit(TransportEvent::ConnectToServer {
            id: link.id.clone(),
            address: link.address.clone(),
        });
        Ok(link)
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        if let Some((_, link)) = self.servers.remove(address) {
            let _ = link.tx.try_send(Frame::Stop);
            link.cancel.cancel();
            debug!(node = %self.id, address = %address, "Disconnected from server");
        }
        Ok(())
    }

    fn servers(&self) -> Vec<PeerLink> {
        self.servers
            .iter()
            .map(|link| PeerLink {
                id: link.peer.clone(),
                address: link.key().clone(),
            })
            .collect()
    }

    async fn tick(&self, to: &NodeId, event: &str, data: Value) -> Result<()> {
        let tx = self.link_sender(to)?;
        self.enqueue(
            to,
            &tx,
            Frame::Tick {
                event: event.to_string(),
                data,
            },
        )
    }

    async fn request(
        &self,
        to: &NodeId,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let tx = self.link_sender(to)?;
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (waiter, reply) = oneshot::channel();
        self.pending.insert(request_id, (to.clone(), waiter));

        let frame = Frame::Request {
            request_id,
            event: event.to_string(),
            data,
        };
        if let Err(e) = self.enqueue(to, &tx, frame) {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(remote))) => Err(remote.into()),
            Ok(Err(_)) => Err(Error::Transport(format!(
                "link to {} closed before the reply to '{}'",
                to, event
            ))),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(Error::Timeout {
                    event: event.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        for link in self.servers.iter() {
            let _ = link.tx.try_send(Frame::Stop);
        }
        for link in self.clients.iter() {
            let _ = link.tx.try_send(Frame::Stop);
        }
        self.servers.clear();
        self.clients.clear();
        self.pending.clear();
        self.shutdown.cancel();
        info!(node = %self.id, "Transport stopped");
        Ok(())
    }
}
