use async_trait::async_trait;
use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::config::LIVENESS_WINDOW;
use crate::core::{Node, NodeId};
use crate::network::discovery::{Finder, NodeTable};
use crate::utils::{Result, RippleError};

pub const SERVICE_TYPE: &str = "_ripple._tcp.local.";
const LOOKUP_INTERVAL: Duration = Duration::from_secs(5);
const LOOKUP_WINDOW: Duration = Duration::from_secs(2);

fn mdns_error(e: mdns_sd::Error) -> RippleError {
    RippleError::NetworkError(format!("mDNS: {}", e))
}

/// Discovery through a published DNS-SD service record and periodic lookups.
///
/// A browser only looks; it publishes nothing, so peers never list it.
pub struct ServiceRecordDiscovery {
    instance: String,
    port: u16,
    publish: bool,
    lookup_interval: Duration,
    table: NodeTable,
    daemon: Option<ServiceDaemon>,
    fullname: Option<String>,
    done: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl ServiceRecordDiscovery {
    /// `port` is advertised in the record; peers reach this node there.
    pub fn new(instance: impl Into<String>, port: u16) -> Self {
        Self {
            instance: instance.into(),
            port,
            publish: true,
            lookup_interval: LOOKUP_INTERVAL,
            table: NodeTable::new(LIVENESS_WINDOW),
            daemon: None,
            fullname: None,
            done: None,
            task: None,
        }
    }

    /// Browse-only instance for one-shot scans.
    pub fn browser() -> Self {
        let mut finder = Self::new("browser", 0);
        finder.publish = false;
        finder
    }

    pub fn with_lookup_interval(mut self, every: Duration) -> Self {
        self.lookup_interval = every;
        self
    }

    /// IPv4 first, since peers dial plain `ip:port` strings.
    fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
    }

    fn node_from_record(fullname: &str, addrs: &[IpAddr], port: u16) -> Option<Node> {
        let ip = Self::pick_address(addrs)?;
        let address = match ip {
            IpAddr::V4(v4) => format!("{}:{}", v4, port),
            IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
        };
        Some(Node::online(NodeId::new(fullname), address, port))
    }

    /// Adds resolved peers to `table`, skipping this node's own record.
    fn record_event(table: &NodeTable, own_fullname: Option<&str>, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                if Some(info.get_fullname()) == own_fullname {
                    return;
                }
                let addrs: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
                match Self::node_from_record(info.get_fullname(), &addrs, info.get_port()) {
                    Some(node) => table.upsert(node),
                    None => debug!("Record {} has no address yet", info.get_fullname()),
                }
            }
            other => debug!("mDNS event: {:?}", other),
        }
    }

    async fn lookup_loop(
        daemon: ServiceDaemon,
        own_fullname: Option<String>,
        table: NodeTable,
        every: Duration,
        done: CancellationToken,
    ) {
        let mut ticker = interval(every);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let receiver = match daemon.browse(SERVICE_TYPE) {
                Ok(receiver) => receiver,
                Err(e) => {
                    warn!("mDNS lookup failed: {}", e);
                    continue;
                }
            };

            let deadline = Instant::now() + LOOKUP_WINDOW.min(every);
            while !done.is_cancelled() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match timeout(remaining, receiver.recv_async()).await {
                    Ok(Ok(event)) => Self::record_event(&table, own_fullname.as_deref(), event),
                    Ok(Err(_)) | Err(_) => break,
                }
            }

            if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
                debug!("mDNS stop_browse: {}", e);
            }
        }
    }
}

#[async_trait]
impl Finder for ServiceRecordDiscovery {
    async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        if self.done.is_some() {
            return Err(RippleError::ConfigError("discovery already started".to_string()));
        }

        let daemon = ServiceDaemon::new().map_err(mdns_error)?;
        let fullname = if self.publish {
            let host = format!("{}.local.", self.instance);
            let record = ServiceInfo::new(
                SERVICE_TYPE,
                &self.instance,
                &host,
                "",
                self.port,
                None::<HashMap<String, String>>,
            )
            .map_err(mdns_error)?
            .enable_addr_auto();
            let fullname = record.get_fullname().to_string();
            daemon.register(record).map_err(mdns_error)?;
            info!("Published service record {} on port {}", fullname, self.port);
            Some(fullname)
        } else {
            debug!("Browsing {} without publishing", SERVICE_TYPE);
            None
        };

        let done = ctx.child_token();
        self.task = Some(tokio::spawn(Self::lookup_loop(
            daemon.clone(),
            fullname.clone(),
            self.table.clone(),
            self.lookup_interval,
            done.clone(),
        )));
        self.daemon = Some(daemon);
        self.fullname = fullname;
        self.done = Some(done);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(done) = self.done.take() {
            done.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("mDNS lookup task ended abnormally: {}", e);
            }
        }
        if let Some(daemon) = self.daemon.take() {
            if let Some(fullname) = self.fullname.take() {
                if let Err(e) = daemon.unregister(&fullname) {
                    debug!("mDNS unregister: {}", e);
                }
            }
            if let Err(e) = daemon.shutdown() {
                debug!("mDNS shutdown: {}", e);
            }
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<Node> {
        self.table.snapshot()
    }
}
