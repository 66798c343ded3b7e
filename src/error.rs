//! Error types for lanbeacon.

use thiserror::Error;

/// Errors that can occur while registering or discovering services.
#[derive(Debug, Error)]
pub enum MdnsError {
    /// A required registration field was empty or zero.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A proxy registration IP parsed as neither IPv4 nor IPv6.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The OS hostname could not be determined and none was supplied.
    #[error("could not determine host name")]
    HostnameLookupFailed,

    /// Address autodetection found no usable local address.
    #[error("could not determine host IP addresses")]
    NoAddresses,

    /// Neither the IPv4 nor the IPv6 wildcard socket could be bound.
    #[error("failed to bind any mDNS socket on port 5353")]
    BindFailure,

    /// The multicast group join failed on every interface for both families.
    #[error("failed to join multicast group on all interfaces")]
    NoMulticastInterface,

    /// DNS wire codec error (malformed packet, uncomposable name).
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// IO error (network, socket options).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
