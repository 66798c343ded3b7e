//! Service identity types and DNS-SD name composition.
//!
//! A [`ServiceRecord`] is the identity triple (instance, service, domain);
//! a [`ServiceEntry`] adds the host, port, TXT data and addresses needed to
//! actually advertise or describe a service. Derived DNS names are composed
//! on first use and cached for the lifetime of the value.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

/// Default TTL for advertised records, in seconds.
pub const DEFAULT_TTL: u32 = 3200;

/// Strip leading and trailing dots from a label or name fragment.
pub fn trim_dot(s: &str) -> &str {
    s.trim_matches('.')
}

/// Identity of a service: instance name, service type and domain.
///
/// The three derived DNS names are composed lazily and cached; mutating the
/// identity fields after a derived name has been read is not supported.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    /// Human-readable instance label (e.g., "My Web Page"). May be empty
    /// for browse queries.
    pub instance: String,
    /// Two-label service type (e.g., "_http._tcp").
    pub service: String,
    /// DNS-SD domain, never empty ("local" by default).
    pub domain: String,

    service_name: OnceLock<String>,
    service_instance_name: OnceLock<String>,
    service_type_name: OnceLock<String>,
}

impl ServiceRecord {
    /// Create a record, defaulting an empty domain to "local".
    pub fn new(instance: &str, service: &str, domain: &str) -> Self {
        let domain = if domain.is_empty() { "local" } else { domain };
        Self {
            instance: instance.to_string(),
            service: service.to_string(),
            domain: domain.to_string(),
            service_name: OnceLock::new(),
            service_instance_name: OnceLock::new(),
            service_type_name: OnceLock::new(),
        }
    }

    /// Complete service name, e.g. `_http._tcp.local.`.
    pub fn service_name(&self) -> &str {
        self.service_name.get_or_init(|| {
            format!("{}.{}.", trim_dot(&self.service), trim_dot(&self.domain))
        })
    }

    /// Complete service instance name, e.g. `My Web Page._http._tcp.local.`.
    ///
    /// Empty when the record has no instance label.
    pub fn service_instance_name(&self) -> &str {
        if self.instance.is_empty() {
            return "";
        }
        self.service_instance_name
            .get_or_init(|| format!("{}.{}", trim_dot(&self.instance), self.service_name()))
    }

    /// Service type enumeration name, `_services._dns-sd._udp.<domain>.`.
    pub fn service_type_name(&self) -> &str {
        self.service_type_name
            .get_or_init(|| format!("_services._dns-sd._udp.{}.", trim_dot(&self.domain)))
    }
}

/// A service registration or a browse/lookup result.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// Service identity.
    pub record: ServiceRecord,
    /// Fully-qualified host name, always suffixed with `.<domain>.`.
    pub hostname: String,
    /// Port the service listens on.
    pub port: u16,
    /// key=value strings served in the TXT record.
    pub text: Vec<String>,
    /// Record TTL in seconds. 0 on withdrawal events.
    pub ttl: u32,
    /// Host IPv4 addresses.
    pub addrs_v4: Vec<Ipv4Addr>,
    /// Host IPv6 addresses.
    pub addrs_v6: Vec<Ipv6Addr>,
}

impl ServiceEntry {
    /// Create an empty entry for the given identity.
    pub fn new(instance: &str, service: &str, domain: &str) -> Self {
        Self {
            record: ServiceRecord::new(instance, service, domain),
            hostname: String::new(),
            port: 0,
            text: Vec::new(),
            ttl: DEFAULT_TTL,
            addrs_v4: Vec::new(),
            addrs_v6: Vec::new(),
        }
    }

    /// Complete service name, e.g. `_http._tcp.local.`.
    pub fn service_name(&self) -> &str {
        self.record.service_name()
    }

    /// Complete service instance name.
    pub fn service_instance_name(&self) -> &str {
        self.record.service_instance_name()
    }

    /// Service type enumeration name.
    pub fn service_type_name(&self) -> &str {
        self.record.service_type_name()
    }
}

/// Qualify `host` with `domain` and a terminal dot.
///
/// `printer` becomes `printer.local.`; a host already under the domain only
/// gains the terminal dot.
pub(crate) fn qualify_hostname(host: &str, domain: &str) -> String {
    let host = trim_dot(host);
    let domain = trim_dot(domain);
    if host == domain || host.ends_with(&format!(".{domain}")) {
        format!("{host}.")
    } else {
        format!("{host}.{domain}.")
    }
}
