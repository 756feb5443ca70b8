use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

use crate::utils::{Result, RippleError};

pub struct NodeUtils;

impl NodeUtils {
    /// Create a UDP socket with SO_REUSEADDR (and SO_REUSEPORT on Unix if available)
    pub fn create_reusable_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
        let socket = Self::new_udp_socket(addr)?;

        socket.set_reuse_address(true).map_err(|e| {
            RippleError::NetworkError(format!("Failed to set reuse_address: {}", e))
        })?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        {
            if let Err(e) = socket.set_reuse_port(true) {
                warn!("Could not set SO_REUSEPORT (not critical): {}", e);
            }
        }

        Self::finish_udp_socket(socket, addr)
    }

    /// Create a broadcast-capable UDP socket, usually on an ephemeral port.
    pub fn create_broadcast_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
        let socket = Self::new_udp_socket(addr)?;
        Self::finish_udp_socket(socket, addr)
    }

    fn new_udp_socket(addr: SocketAddr) -> Result<Socket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| RippleError::NetworkError(format!("Failed to create socket: {}", e)))
    }

    fn finish_udp_socket(socket: Socket, addr: SocketAddr) -> Result<UdpSocket> {
        socket
            .set_broadcast(true)
            .map_err(|e| RippleError::NetworkError(format!("Failed to set broadcast: {}", e)))?;

        socket.bind(&addr.into()).map_err(|e| {
            RippleError::NetworkError(format!("Failed to bind to {}: {}", addr, e))
        })?;

        socket.set_nonblocking(true).map_err(|e| {
            RippleError::NetworkError(format!("Failed to set nonblocking: {}", e))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| {
            RippleError::NetworkError(format!("Failed to convert to tokio socket: {}", e))
        })
    }

    /// Directed broadcast address of every non-loopback IPv4 interface.
    pub fn interface_broadcast_addrs() -> Vec<Ipv4Addr> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("Failed to enumerate interfaces: {}", e);
                return Vec::new();
            }
        };

        let mut addrs = Vec::new();
        for iface in interfaces {
            if iface.is_loopback() {
                continue;
            }
            if let if_addrs::IfAddr::V4(v4) = iface.addr {
                let bcast = Self::broadcast_for(v4.ip, v4.netmask);
                if !addrs.contains(&bcast) {
                    addrs.push(bcast);
                }
            }
        }
        addrs
    }

    pub fn broadcast_for(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
    }

    /// Loopback, limited broadcast, then every interface broadcast, all on `port`.
    pub fn discovery_destinations(port: u16) -> Vec<SocketAddr> {
        let mut dests = vec![
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
        ];
        for ip in Self::interface_broadcast_addrs() {
            dests.push(SocketAddr::new(IpAddr::V4(ip), port));
        }
        dests
    }
}
