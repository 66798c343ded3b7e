//! Multicast UDP socket setup for mDNS.
//!
//! Binds wildcard sockets on port 5353 for each IP family and joins the
//! mDNS multicast groups on the selected interfaces. Port 5353 is commonly
//! held by the OS responder, so the sockets are always bound with address
//! reuse; this crate never assumes exclusive ownership of the port.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::error::MdnsError;
use crate::metrics;

/// IPv4 multicast group used by mDNS.
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// IPv6 multicast group used by mDNS.
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// UDP port used by mDNS.
pub const MDNS_PORT: u16 = 5353;

/// Receive buffer size per datagram.
pub(crate) const MAX_PACKET: usize = 65_536;

/// The pair of wildcard mDNS sockets for one registration or browse.
#[derive(Clone, Debug)]
pub(crate) struct MulticastSockets {
    /// IPv4 socket, if the bind succeeded.
    pub v4: Option<Arc<UdpSocket>>,
    /// IPv6 socket, if the bind succeeded.
    pub v6: Option<Arc<UdpSocket>>,
}

impl MulticastSockets {
    /// Bind both families and join the multicast groups.
    ///
    /// `interfaces` restricts the joins to the named interfaces; an empty
    /// slice means every interface the OS reports. Per-interface join
    /// failures are tolerated as long as at least one join succeeds on at
    /// least one family.
    pub fn bind(interfaces: &[String]) -> Result<Self, MdnsError> {
        let v4 = match bind_family(Domain::IPV4) {
            Ok(sock) => Some(Arc::new(sock)),
            Err(e) => {
                warn!("failed to bind mDNS IPv4 socket: {}", e);
                None
            }
        };
        let v6 = match bind_family(Domain::IPV6) {
            Ok(sock) => Some(Arc::new(sock)),
            Err(e) => {
                warn!("failed to bind mDNS IPv6 socket: {}", e);
                None
            }
        };
        if v4.is_none() && v6.is_none() {
            return Err(MdnsError::BindFailure);
        }

        let sockets = Self { v4, v6 };
        let joined = sockets.join_groups(&selected_interfaces(interfaces));
        if joined == 0 {
            return Err(MdnsError::NoMulticastInterface);
        }
        debug!(joined, "joined mDNS multicast groups");

        Ok(sockets)
    }

    /// Join the group on every interface; returns the number of successful
    /// joins across both families.
    fn join_groups(&self, interfaces: &[if_addrs::Interface]) -> usize {
        let mut joined = 0;

        if let Some(sock) = &self.v4 {
            let mut seen = Vec::new();
            for iface in interfaces {
                let if_addrs::IfAddr::V4(addr) = &iface.addr else {
                    continue;
                };
                if seen.contains(&addr.ip) {
                    continue;
                }
                seen.push(addr.ip);
                match sock.join_multicast_v4(MDNS_GROUP_V4, addr.ip) {
                    Ok(()) => joined += 1,
                    Err(e) => trace!(iface = %iface.name, "IPv4 join failed: {}", e),
                }
            }
        }

        if let Some(sock) = &self.v6 {
            let mut seen = Vec::new();
            for iface in interfaces {
                if !matches!(iface.addr, if_addrs::IfAddr::V6(_)) {
                    continue;
                }
                let index = iface.index.unwrap_or(0);
                if seen.contains(&index) {
                    continue;
                }
                seen.push(index);
                match sock.join_multicast_v6(&MDNS_GROUP_V6, index) {
                    Ok(()) => joined += 1,
                    Err(e) => trace!(iface = %iface.name, "IPv6 join failed: {}", e),
                }
            }
        }

        joined
    }

    /// Send a packed DNS message to the fixed multicast endpoints.
    ///
    /// Send errors are logged and swallowed; mDNS is best-effort.
    pub async fn send_multicast(&self, payload: &[u8]) {
        if let Some(sock) = &self.v4 {
            let dest = SocketAddr::V4(SocketAddrV4::new(MDNS_GROUP_V4, MDNS_PORT));
            match sock.send_to(payload, dest).await {
                Ok(_) => metrics::record_send("multicast", "v4"),
                Err(e) => {
                    metrics::record_send_error("multicast", "v4");
                    warn!("multicast send (IPv4) failed: {}", e);
                }
            }
        }
        if let Some(sock) = &self.v6 {
            let dest = SocketAddr::V6(SocketAddrV6::new(MDNS_GROUP_V6, MDNS_PORT, 0, 0));
            match sock.send_to(payload, dest).await {
                Ok(_) => metrics::record_send("multicast", "v6"),
                Err(e) => {
                    metrics::record_send_error("multicast", "v6");
                    warn!("multicast send (IPv6) failed: {}", e);
                }
            }
        }
    }

    /// Send a packed DNS message to a single peer, routed by family.
    pub async fn send_unicast(&self, payload: &[u8], to: SocketAddr) {
        let sock = match to {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => &self.v6,
        };
        let Some(sock) = sock else {
            warn!(%to, "no socket for unicast reply family");
            return;
        };
        match sock.send_to(payload, to).await {
            Ok(_) => metrics::record_send("unicast", family_label(&to)),
            Err(e) => {
                metrics::record_send_error("unicast", family_label(&to));
                warn!(%to, "unicast send failed: {}", e);
            }
        }
    }
}

fn family_label(addr: &SocketAddr) -> &'static str {
    match addr {
        SocketAddr::V4(_) => "v4",
        SocketAddr::V6(_) => "v6",
    }
}

/// Bind a nonblocking, reuse-enabled wildcard socket on port 5353.
fn bind_family(domain: Domain) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    if domain == Domain::IPV6 {
        socket.set_only_v6(true)?;
        socket.bind(&SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0).into())?;
        socket.set_multicast_loop_v6(true)?;
    } else {
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(255)?;
    }

    socket.set_nonblocking(true)?;
    UdpSocket::from_std(std::net::UdpSocket::from(socket))
}

/// Interfaces matching the caller's selection (all of them when empty).
pub(crate) fn selected_interfaces(names: &[String]) -> Vec<if_addrs::Interface> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|iface| names.is_empty() || names.iter().any(|n| n == &iface.name))
        .collect()
}
