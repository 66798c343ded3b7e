//! lanbeacon - a Multicast DNS (RFC 6762) and DNS-SD (RFC 6763) responder
//! and resolver for link-local service discovery.
//!
//! This crate lets a process advertise a service instance so peers on the
//! local link can find it, and browse or look up instances published by
//! peers, over the mDNS multicast groups 224.0.0.251 / ff02::fb on UDP
//! port 5353.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            lanbeacon                             │
//! │                                                                  │
//! │        224.0.0.251:5353 / [ff02::fb]:5353 (reuse-addr)           │
//! │  ┌──────────────────┐                 ┌──────────────────┐       │
//! │  │  Socket Layer    │◀───UDP 5353────▶│  Socket Layer    │       │
//! │  └────────┬─────────┘                 └────────┬─────────┘       │
//! │           ▼ decode (hickory-proto)             ▼                 │
//! │  ┌──────────────────┐                 ┌──────────────────┐       │
//! │  │  Responder       │                 │  Resolver        │       │
//! │  │  (Registration)  │                 │  (browse/lookup) │       │
//! │  └────────┬─────────┘                 └────────┬─────────┘       │
//! │           │ probe → announce → goodbye         │ entry stream    │
//! │           ▼                                    ▼                 │
//! │     multicast answers                   ServiceEntry events      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Registering a service
//!
//! ```rust,ignore
//! use lanbeacon::register;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registration = register(
//!         "My Web Page",
//!         "_http._tcp",
//!         "",
//!         8080,
//!         vec!["path=/".to_string()],
//!         vec![],
//!         0,
//!     )
//!     .unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     registration.shutdown().await;
//! }
//! ```
//!
//! ## Browsing
//!
//! ```rust,ignore
//! use lanbeacon::Resolver;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cancel = CancellationToken::new();
//!     let mut stream = Resolver::new()
//!         .browse("_http._tcp", "", &cancel)
//!         .unwrap();
//!     while let Some(entry) = stream.recv().await {
//!         println!("{}: {}:{}", entry.record.instance, entry.hostname, entry.port);
//!     }
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod resolver;
pub mod responder;
pub mod service;
pub mod telemetry;

mod probe;
mod socket;

// Re-export main types
pub use config::{Config, MdnsConfig, ServiceConfig, TelemetryConfig};
pub use error::MdnsError;
pub use resolver::{Resolver, ServiceStream};
pub use responder::{register, register_proxy, register_with_config, Registration};
pub use service::{ServiceEntry, ServiceRecord};
pub use socket::{MDNS_GROUP_V4, MDNS_GROUP_V6, MDNS_PORT};
