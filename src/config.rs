//! Configuration types for lanbeacon.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service registration configuration.
    pub service: ServiceConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// A service registration as loaded from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Human-readable instance name (e.g., "My Web Page").
    pub instance: String,

    /// Two-label service type (e.g., "_http._tcp").
    pub service: String,

    /// DNS-SD domain. Defaults to "local".
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Port the advertised service listens on.
    pub port: u16,

    /// key=value strings served in the TXT record.
    #[serde(default)]
    pub text: Vec<String>,

    /// Interface names to advertise on. Empty means all OS interfaces.
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Record TTL in seconds. 0 means the default (3200).
    #[serde(default)]
    pub ttl: u32,
}

/// Tuning knobs for the responder lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// TTL for advertised records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Number of probe queries sent before announcing. Capped at 3.
    #[serde(default = "default_sends")]
    pub probe_sends: u8,

    /// Number of unsolicited announcements. Capped at 3.
    #[serde(default = "default_sends")]
    pub announce_sends: u8,

    /// Interface names to bind multicast on. Empty means all OS interfaces.
    #[serde(default)]
    pub interfaces: Vec<String>,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            probe_sends: default_sends(),
            announce_sends: default_sends(),
            interfaces: Vec::new(),
        }
    }
}

impl MdnsConfig {
    /// Probe count with the RFC 6762 robustness cap applied.
    pub(crate) fn capped_probe_sends(&self) -> u8 {
        self.probe_sends.min(MAX_SENDS)
    }

    /// Announce count with the robustness cap applied.
    pub(crate) fn capped_announce_sends(&self) -> u8 {
        self.announce_sends.min(MAX_SENDS)
    }
}

/// Upper bound on probe/announce repetitions.
const MAX_SENDS: u8 = 3;

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "lanbeacon=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<std::net::SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_domain() -> String {
    "local".to_string()
}

fn default_ttl() -> u32 {
    crate::service::DEFAULT_TTL
}

fn default_sends() -> u8 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mdns_defaults() {
        let config = MdnsConfig::default();
        assert_eq!(config.ttl, 3200);
        assert_eq!(config.probe_sends, 2);
        assert_eq!(config.announce_sends, 2);
        assert!(config.interfaces.is_empty());
    }

    #[test]
    fn test_send_counts_are_capped() {
        let config = MdnsConfig {
            probe_sends: 8,
            announce_sends: 200,
            ..Default::default()
        };
        assert_eq!(config.capped_probe_sends(), 3);
        assert_eq!(config.capped_announce_sends(), 3);
    }

    #[test]
    fn test_service_config_defaults() {
        let toml = r#"
            instance = "My Web Page"
            service = "_http._tcp"
            port = 8080
        "#;
        let config: ServiceConfig = toml_from_str(toml);
        assert_eq!(config.domain, "local");
        assert_eq!(config.ttl, 0);
        assert!(config.text.is_empty());
        assert!(config.interfaces.is_empty());
    }

    fn toml_from_str(s: &str) -> ServiceConfig {
        config::Config::builder()
            .add_source(config::File::from_str(s, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
