//! Basic identifiers and enums shared across the crate
// (c) 2025 Ross Younger

use std::fmt::Display;

use serde::Serialize;

/// Identifies a stream within a connection
pub type StreamId = u32;

/// Identifies a connection
pub type ConnectionId = u64;

/// A negotiated QUIC version number
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("QUIC_VERSION_{_0}")]
pub struct QuicVersion(pub u32);

/// A host name and port
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HostPortPair {
    /// Host name (or literal address)
    pub host: String,
    /// Port number
    pub port: u16,
}

impl HostPortPair {
    /// Constructor
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
        }
    }
}

impl Display for HostPortPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The identity of a server, as far as session pooling is concerned
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerKey {
    /// Where we are connecting to
    pub host_port_pair: HostPortPair,
    /// Whether the session carries https traffic
    pub is_https: bool,
}

impl ServerKey {
    /// Constructor
    #[must_use]
    pub fn new(host_port_pair: HostPortPair, is_https: bool) -> Self {
        Self {
            host_port_pair,
            is_https,
        }
    }

    /// Accessor
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host_port_pair.host
    }
}

impl Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.is_https { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.host_port_pair)
    }
}

/// Milestones reported by the crypto handshake stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum CryptoHandshakeEvent {
    /// Encryption is established for the first time; the client may now send
    /// data speculatively.
    EncryptionFirstEstablished,
    /// Encryption was re-established after a rejected 0-RTT attempt
    EncryptionReestablished,
    /// Both endpoints have validated the handshake
    HandshakeConfirmed,
}

/// Handshake progress, as recorded by the metrics sink
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum HandshakeState {
    /// `crypto_connect` was called
    Started,
    /// Encryption was established by the time the session ended
    EncryptionEstablished,
    /// The handshake was confirmed by the time the session ended
    HandshakeConfirmed,
    /// The session ended without handshake confirmation
    Failed,
}

/// The result of an operation that may complete later, via a callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Completed synchronously; the callback will not be invoked
    Done(T),
    /// The callback will be invoked when the operation completes
    Pending,
}

impl<T> Outcome<T> {
    /// Returns true if this outcome is [`Outcome::Pending`]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{HostPortPair, QuicVersion, ServerKey};
    use pretty_assertions::assert_eq;

    #[test]
    fn host_port_display() {
        assert_eq!(HostPortPair::new("example.com", 443).to_string(), "example.com:443");
        assert_eq!(HostPortPair::new("::1", 80).to_string(), "[::1]:80");
    }

    #[test]
    fn server_key_display() {
        let key = ServerKey::new(HostPortPair::new("www.example.org", 443), true);
        assert_eq!(key.to_string(), "https://www.example.org:443");
        assert_eq!(key.host(), "www.example.org");
    }

    #[test]
    fn version_display() {
        assert_eq!(QuicVersion(18).to_string(), "QUIC_VERSION_18");
    }
}
