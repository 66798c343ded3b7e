//! Service registration and the mDNS responder.
//!
//! A [`Registration`] owns its pair of multicast sockets, two receive
//! loops (one per IP family) and the probe/announce driver. There is no
//! process-wide state: multiple registrations in one process each bind
//! their own reuse-addr sockets on port 5353.

use std::net::IpAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::Name;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::MdnsConfig;
use crate::error::MdnsError;
use crate::message;
use crate::metrics::{self, Timer};
use crate::probe;
use crate::service::{qualify_hostname, ServiceEntry};
use crate::socket::{selected_interfaces, MulticastSockets, MAX_PACKET};

/// Register a service, autodetecting the hostname and local addresses.
///
/// `domain` defaults to `local` and `ttl` 0 means the default (3200 s)
/// when left empty/zero. An empty `interfaces` list advertises on every
/// OS interface. Must be called from within a Tokio runtime.
pub fn register(
    instance: &str,
    service: &str,
    domain: &str,
    port: u16,
    text: Vec<String>,
    interfaces: Vec<String>,
    ttl: u32,
) -> Result<Registration, MdnsError> {
    let mut config = MdnsConfig {
        interfaces,
        ..Default::default()
    };
    if ttl != 0 {
        config.ttl = ttl;
    }
    register_with_config(instance, service, domain, port, text, config)
}

/// Register a service with explicit lifecycle tuning.
pub fn register_with_config(
    instance: &str,
    service: &str,
    domain: &str,
    port: u16,
    text: Vec<String>,
    config: MdnsConfig,
) -> Result<Registration, MdnsError> {
    let mut entry = new_validated_entry(instance, service, domain, port, text)?;

    let host = hostname::get()
        .map_err(|_| MdnsError::HostnameLookupFailed)?
        .to_string_lossy()
        .to_string();
    if host.is_empty() {
        return Err(MdnsError::HostnameLookupFailed);
    }
    entry.hostname = qualify_hostname(&host, &entry.record.domain);

    autodetect_addrs(&mut entry, &config.interfaces);
    if entry.addrs_v4.is_empty() && entry.addrs_v6.is_empty() {
        return Err(MdnsError::NoAddresses);
    }

    register_entry(entry, config)
}

/// Register a service with a caller-supplied host name and addresses,
/// skipping autodetection.
#[allow(clippy::too_many_arguments)]
pub fn register_proxy(
    instance: &str,
    service: &str,
    domain: &str,
    port: u16,
    host: &str,
    ips: Vec<String>,
    text: Vec<String>,
    interfaces: Vec<String>,
    ttl: u32,
) -> Result<Registration, MdnsError> {
    let mut config = MdnsConfig {
        interfaces,
        ..Default::default()
    };
    if ttl != 0 {
        config.ttl = ttl;
    }

    let mut entry = new_validated_entry(instance, service, domain, port, text)?;
    if host.is_empty() {
        return Err(MdnsError::MissingField("hostname"));
    }
    entry.hostname = qualify_hostname(host, &entry.record.domain);

    for ip in &ips {
        match ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => entry.addrs_v4.push(v4),
            Ok(IpAddr::V6(v6)) => entry.addrs_v6.push(v6),
            Err(_) => return Err(MdnsError::InvalidAddress(ip.clone())),
        }
    }
    if entry.addrs_v4.is_empty() && entry.addrs_v6.is_empty() {
        return Err(MdnsError::NoAddresses);
    }

    register_entry(entry, config)
}

fn new_validated_entry(
    instance: &str,
    service: &str,
    domain: &str,
    port: u16,
    text: Vec<String>,
) -> Result<ServiceEntry, MdnsError> {
    if instance.is_empty() {
        return Err(MdnsError::MissingField("instance"));
    }
    if service.is_empty() {
        return Err(MdnsError::MissingField("service"));
    }
    if port == 0 {
        return Err(MdnsError::MissingField("port"));
    }
    let mut entry = ServiceEntry::new(instance, service, domain);
    entry.port = port;
    entry.text = text;
    Ok(entry)
}

/// Collect usable addresses from the selected interfaces: IPv4 when
/// non-loopback and non-link-local, IPv6 only when global unicast.
fn autodetect_addrs(entry: &mut ServiceEntry, interfaces: &[String]) {
    for iface in selected_interfaces(interfaces) {
        match &iface.addr {
            if_addrs::IfAddr::V4(a) => {
                if !a.ip.is_loopback() && !a.ip.is_link_local() {
                    entry.addrs_v4.push(a.ip);
                }
            }
            if_addrs::IfAddr::V6(a) => {
                if is_global_unicast_v6(&a.ip) {
                    entry.addrs_v6.push(a.ip);
                }
            }
        }
    }
}

/// RFC 4291 global unicast: not loopback, unspecified or multicast, and
/// outside link-local fe80::/10 and unique-local fc00::/7.
fn is_global_unicast_v6(ip: &std::net::Ipv6Addr) -> bool {
    let seg0 = ip.segments()[0];
    !ip.is_loopback()
        && !ip.is_unspecified()
        && !ip.is_multicast()
        && (seg0 & 0xffc0) != 0xfe80
        && (seg0 & 0xfe00) != 0xfc00
}

fn register_entry(mut entry: ServiceEntry, config: MdnsConfig) -> Result<Registration, MdnsError> {
    entry.ttl = config.ttl;

    let names = RespondNames::new(&entry)?;
    let sockets = MulticastSockets::bind(&config.interfaces)?;

    let inner = Arc::new(RegistrationInner {
        entry: RwLock::new(entry),
        names,
        config,
        sockets: RwLock::new(Some(sockets.clone())),
        shutting_down: tokio::sync::Mutex::new(false),
        cancel: CancellationToken::new(),
    });

    if let Some(sock) = &sockets.v4 {
        tokio::spawn(recv_loop(inner.clone(), sock.clone()));
    }
    if let Some(sock) = &sockets.v6 {
        tokio::spawn(recv_loop(inner.clone(), sock.clone()));
    }
    tokio::spawn(probe::run(inner.clone()));

    {
        let entry = inner.entry.read();
        info!(
            instance = %entry.record.instance,
            service = %entry.record.service,
            domain = %entry.record.domain,
            port = entry.port,
            "registered mDNS service"
        );
    }

    Ok(Registration { inner })
}

/// The question names a registration answers for, parsed once.
#[derive(Debug)]
struct RespondNames {
    service: Name,
    instance: Name,
    hostname: Name,
    type_enum: Name,
}

impl RespondNames {
    fn new(entry: &ServiceEntry) -> Result<Self, MdnsError> {
        Ok(Self {
            service: Name::from_utf8(entry.service_name())?,
            instance: Name::from_utf8(entry.service_instance_name())?,
            hostname: Name::from_utf8(&entry.hostname)?,
            type_enum: Name::from_utf8(entry.service_type_name())?,
        })
    }
}

/// State shared by the receive loops, the probe driver and the handle.
#[derive(Debug)]
pub(crate) struct RegistrationInner {
    entry: RwLock<ServiceEntry>,
    names: RespondNames,
    pub(crate) config: MdnsConfig,
    sockets: RwLock<Option<MulticastSockets>>,
    shutting_down: tokio::sync::Mutex<bool>,
    pub(crate) cancel: CancellationToken,
}

impl RegistrationInner {
    /// Snapshot of the entry for composing one response.
    pub(crate) fn snapshot(&self) -> ServiceEntry {
        self.entry.read().clone()
    }

    /// Socket pair, or None once shutdown has begun.
    pub(crate) fn sockets(&self) -> Option<MulticastSockets> {
        self.sockets.read().clone()
    }

    /// Compose and multicast one message; errors are logged and swallowed.
    pub(crate) async fn multicast(&self, msg: &Message) {
        let Some(sockets) = self.sockets() else {
            return;
        };
        match msg.to_vec() {
            Ok(buf) => sockets.send_multicast(&buf).await,
            Err(e) => warn!("failed to pack mDNS message: {}", e),
        }
    }

    async fn handle_packet(&self, msg: Message, from: std::net::SocketAddr) {
        // Not a pure query: responses and probe-style packets carry
        // answers or authority records and are not answered.
        if msg.message_type() == MessageType::Response
            || !msg.answers().is_empty()
            || !msg.name_servers().is_empty()
        {
            return;
        }

        for question in msg.queries() {
            let timer = Timer::start();
            let entry = self.snapshot();
            let ttl = entry.ttl;
            let (kind, composed) = if question.name() == &self.names.service {
                ("browse", message::browse_response(&entry, ttl))
            } else if question.name() == &self.names.instance
                || question.name() == &self.names.hostname
            {
                ("lookup", message::lookup_response(&entry, ttl))
            } else if question.name() == &self.names.type_enum {
                ("type_enum", message::service_type_response(&entry, ttl))
            } else {
                continue;
            };

            let mut response = match composed {
                Ok(response) => response,
                Err(e) => {
                    warn!(question = %question.name(), "failed to compose answer: {}", e);
                    continue;
                }
            };
            if response.answers().is_empty() {
                continue;
            }
            response.set_id(msg.id());

            let Some(sockets) = self.sockets() else {
                return;
            };
            let buf = match response.to_vec() {
                Ok(buf) => buf,
                Err(e) => {
                    warn!("failed to pack answer: {}", e);
                    continue;
                }
            };
            if message::wants_unicast(question) {
                sockets.send_unicast(&buf, from).await;
            } else {
                sockets.send_multicast(&buf).await;
            }
            metrics::record_question(kind, timer.elapsed());
        }
    }
}

/// Long-running receive loop for one socket.
async fn recv_loop(inner: Arc<RegistrationInner>, sock: Arc<UdpSocket>) {
    let mut buf = vec![0u8; MAX_PACKET];
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            result = sock.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    match message::decode(&buf[..len]) {
                        Ok(msg) => {
                            metrics::record_packet("decoded");
                            inner.handle_packet(msg, from).await;
                        }
                        Err(e) => {
                            metrics::record_packet("dropped");
                            debug!(%from, "dropped undecodable packet: {}", e);
                        }
                    }
                }
                Err(e) => {
                    if inner.cancel.is_cancelled() {
                        break;
                    }
                    debug!("mDNS receive error: {}", e);
                }
            }
        }
    }
    trace!("responder receive loop exited");
}

/// Handle to a live service registration.
///
/// The registration stays advertised until [`Registration::shutdown`] is
/// called. Dropping the handle stops the background tasks without sending
/// the goodbye.
#[derive(Debug)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    /// Snapshot of the advertised entry.
    pub fn entry(&self) -> ServiceEntry {
        self.inner.snapshot()
    }

    /// Replace the TXT data and announce the change.
    ///
    /// Exactly one multicast packet is sent, carrying a single TXT record
    /// with the cache-flush bit and the configured TTL.
    pub async fn set_text(&self, text: Vec<String>) {
        self.inner.entry.write().text = text;
        let entry = self.inner.snapshot();
        match message::txt_announcement(&entry, entry.ttl) {
            Ok(msg) => self.inner.multicast(&msg).await,
            Err(e) => warn!("failed to compose TXT announcement: {}", e),
        }
    }

    /// Set the TTL used for subsequent records.
    pub fn set_ttl(&self, ttl: u32) {
        self.inner.entry.write().ttl = ttl;
    }

    /// Send the goodbye and close the sockets.
    ///
    /// Idempotent; calls after the first are no-ops. The goodbye is
    /// best-effort: send failures are logged and ignored.
    pub async fn shutdown(&self) {
        let mut down = self.inner.shutting_down.lock().await;
        if *down {
            return;
        }
        *down = true;

        let entry = self.inner.snapshot();
        match message::lookup_response(&entry, 0) {
            Ok(goodbye) => self.inner.multicast(&goodbye).await,
            Err(e) => warn!("failed to compose goodbye: {}", e),
        }

        // Receive loops exit on the token; dropping the socket slot
        // releases the last send references.
        *self.inner.sockets.write() = None;
        self.inner.cancel.cancel();

        info!(instance = %entry.record.instance, "mDNS registration shut down");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
