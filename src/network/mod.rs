pub mod discovery;
pub mod mdns;
pub mod transport;

pub use discovery::{BroadcastDiscovery, DiscoveryMode, Finder, NodeTable};
pub use mdns::ServiceRecordDiscovery;
pub use transport::{TcpTransport, Transport};
