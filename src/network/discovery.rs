use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::config::{ANNOUNCE_INTERVAL, LIVENESS_WINDOW};
use crate::core::{Config, Node, NodeId};
use crate::utils::{NodeUtils, Result, RippleError};

/// How long a receive blocks before the loop re-checks for shutdown.
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const QUERY_BURSTS: usize = 3;
const QUERY_SPACING: Duration = Duration::from_millis(300);
const MAX_DATAGRAM: usize = 2048;

/// Keeps a table of live peers. Implemented by the broadcast and service-record strategies.
#[async_trait]
pub trait Finder: Send + Sync {
    /// Begin background announce/listen activity. Cancelling `ctx` stops it too.
    async fn start(&mut self, ctx: CancellationToken) -> Result<()>;
    /// Stop background activity and release the network handle.
    async fn stop(&mut self) -> Result<()>;
    /// Snapshot of peers seen within the liveness window.
    fn nodes(&self) -> Vec<Node>;
}

/// NodeId -> Node map shared between the receive loop and callers.
#[derive(Clone)]
pub struct NodeTable {
    nodes: Arc<Mutex<HashMap<NodeId, Node>>>,
    window: Duration,
}

impl NodeTable {
    pub fn new(window: Duration) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn upsert(&self, node: Node) {
        let mut nodes = self.lock();
        if !nodes.contains_key(&node.id) {
            info!("Discovered peer {} at {}", node.id, node.address);
        }
        nodes.insert(node.id.clone(), node);
    }

    /// Evicts stale entries, then returns what is left.
    pub fn snapshot(&self) -> Vec<Node> {
        let cutoff = match chrono::Duration::from_std(self.window) {
            Ok(window) => Utc::now() - window,
            Err(_) => chrono::DateTime::<Utc>::MIN_UTC,
        };

        let mut nodes = self.lock();
        nodes.retain(|id, node| {
            let live = node.last_seen >= cutoff;
            if !live {
                debug!("Evicting stale peer {}", id);
            }
            live
        });
        nodes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Announce,
    Query,
}

/// UDP discovery envelope, one JSON object per datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMsg {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub name: String,
    pub address: String,
    pub msg: String,
}

impl BroadcastMsg {
    fn new(kind: MessageKind, node_id: &str, name: &str) -> Self {
        let msg = match kind {
            MessageKind::Announce => "Ripple discovery",
            MessageKind::Query => "Ripple discovery query",
        };
        Self {
            kind,
            node_id: node_id.to_string(),
            name: name.to_string(),
            address: String::new(),
            msg: msg.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Fixed port, periodic announces, answers queries.
    Service,
    /// Ephemeral port, a few query bursts, never answers.
    Scan,
}

/// Decides what to do with one received datagram.
#[derive(Clone)]
struct MessageHandler {
    self_id: String,
    name: String,
    port: u16,
    mode: DiscoveryMode,
    table: NodeTable,
}

impl MessageHandler {
    /// Returns the reply to unicast back to `from`, if any.
    fn handle(&self, data: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        let message: BroadcastMsg = match serde_json::from_slice(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring malformed datagram from {}: {}", from, e);
                return None;
            }
        };

        if message.node_id == self.self_id {
            return None;
        }

        match message.kind {
            MessageKind::Query => {
                if self.mode != DiscoveryMode::Service {
                    return None;
                }
                debug!("Answering query from {} ({})", message.node_id, from);
                let reply = BroadcastMsg::new(MessageKind::Announce, &self.self_id, &self.name);
                serde_json::to_vec(&reply).ok()
            }
            MessageKind::Announce => {
                let address = format!("{}:{}", from.ip(), self.port);
                self.table
                    .upsert(Node::online(NodeId::new(message.node_id), address, self.port));
                None
            }
        }
    }
}

/// LAN discovery over UDP broadcast.
pub struct BroadcastDiscovery {
    handler: MessageHandler,
    announce_interval: Duration,
    done: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl BroadcastDiscovery {
    /// Service mode on `port`.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self::with_mode(name.into(), port, DiscoveryMode::Service)
    }

    /// One-shot scanner that queries `port` from an ephemeral socket.
    pub fn scanner(port: u16) -> Self {
        Self::with_mode("scanner".to_string(), port, DiscoveryMode::Scan)
    }

    /// Service mode with the name, port and timings from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.node_name.clone(), config.discovery_port)
            .with_announce_interval(config.announce_interval)
            .with_liveness_window(config.liveness_window)
    }

    /// Scanner counterpart of [`BroadcastDiscovery::from_config`].
    pub fn scanner_from_config(config: &Config) -> Self {
        Self::scanner(config.discovery_port).with_liveness_window(config.liveness_window)
    }

    fn with_mode(name: String, port: u16, mode: DiscoveryMode) -> Self {
        let self_id = format!("{}-{}", name, Uuid::new_v4().simple());
        Self {
            handler: MessageHandler {
                self_id,
                name,
                port,
                mode,
                table: NodeTable::new(LIVENESS_WINDOW),
            },
            announce_interval: ANNOUNCE_INTERVAL,
            done: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_announce_interval(mut self, every: Duration) -> Self {
        self.announce_interval = every;
        self
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.handler.table = NodeTable::new(window);
        self
    }

    /// Session-unique ID carried by every outgoing message.
    pub fn self_id(&self) -> &str {
        &self.handler.self_id
    }

    async fn receive_loop(socket: Arc<UdpSocket>, handler: MessageHandler, done: CancellationToken) {
        let mut buffer = [0u8; MAX_DATAGRAM];
        debug!("Discovery receive loop started for {}", handler.self_id);

        while !done.is_cancelled() {
            let (len, from) = match timeout(READ_TIMEOUT, socket.recv_from(&mut buffer)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    debug!("Discovery receive error: {}", e);
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            if let Some(reply) = handler.handle(&buffer[..len], from) {
                if let Err(e) = socket.send_to(&reply, from).await {
                    debug!("Failed to answer {}: {}", from, e);
                }
            }
        }
        debug!("Discovery receive loop stopped for {}", handler.self_id);
    }

    async fn announce_loop(
        socket: UdpSocket,
        message: Vec<u8>,
        destinations: Vec<SocketAddr>,
        every: Duration,
        done: CancellationToken,
    ) {
        let mut ticker = interval(every);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {
                    for dest in &destinations {
                        if let Err(e) = socket.send_to(&message, dest).await {
                            debug!("Announce to {} failed: {}", dest, e);
                        }
                    }
                }
            }
        }
    }

    async fn query_bursts(
        socket: Arc<UdpSocket>,
        message: Vec<u8>,
        destinations: Vec<SocketAddr>,
        done: CancellationToken,
    ) {
        for _ in 0..QUERY_BURSTS {
            for dest in &destinations {
                if let Err(e) = socket.send_to(&message, dest).await {
                    debug!("Query to {} failed: {}", dest, e);
                }
            }
            tokio::select! {
                _ = done.cancelled() => return,
                _ = sleep(QUERY_SPACING) => {}
            }
        }
    }
}

#[async_trait]
impl Finder for BroadcastDiscovery {
    async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        if self.done.is_some() {
            return Err(RippleError::ConfigError("discovery already started".to_string()));
        }

        let done = ctx.child_token();
        let port = self.handler.port;
        let destinations = NodeUtils::discovery_destinations(port);

        match self.handler.mode {
            DiscoveryMode::Service => {
                let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
                let socket = Arc::new(NodeUtils::create_reusable_udp_socket(bind_addr)?);
                let sender = NodeUtils::create_broadcast_udp_socket(([0, 0, 0, 0], 0).into())?;
                let announce = serde_json::to_vec(&BroadcastMsg::new(
                    MessageKind::Announce,
                    &self.handler.self_id,
                    &self.handler.name,
                ))?;

                self.tasks.push(tokio::spawn(Self::receive_loop(
                    socket,
                    self.handler.clone(),
                    done.clone(),
                )));
                self.tasks.push(tokio::spawn(Self::announce_loop(
                    sender,
                    announce,
                    destinations,
                    self.announce_interval,
                    done.clone(),
                )));
                info!(
                    "Discovery service '{}' announcing on UDP port {}",
                    self.handler.name, port
                );
            }
            DiscoveryMode::Scan => {
                let socket = Arc::new(NodeUtils::create_broadcast_udp_socket(
                    ([0, 0, 0, 0], 0).into(),
                )?);
                let query = serde_json::to_vec(&BroadcastMsg::new(
                    MessageKind::Query,
                    &self.handler.self_id,
                    &self.handler.name,
                ))?;

                self.tasks.push(tokio::spawn(Self::receive_loop(
                    socket.clone(),
                    self.handler.clone(),
                    done.clone(),
                )));
                self.tasks.push(tokio::spawn(Self::query_bursts(
                    socket,
                    query,
                    destinations,
                    done.clone(),
                )));
                debug!("Scanning for peers on UDP port {}", port);
            }
        }

        self.done = Some(done);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(done) = self.done.take() {
            done.cancel();
        }
        // Each loop notices the signal within one read timeout; the socket drops with it.
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Discovery task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<Node> {
        self.handler.table.snapshot()
    }
}
