//! Connection event logging
// (c) 2025 Ross Younger

use std::cell::Cell;
use std::net::SocketAddr;

use human_repr::HumanCount as _;
use tracing::{Span, debug, trace};

use crate::error::QuicErrorCode;
use crate::types::QuicVersion;

/// A crypto handshake message, as far as logging is concerned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CryptoHandshakeMessage {
    /// Message tag, e.g. `CHLO`, `REJ`, `SHLO`
    pub tag: String,
    /// Serialized length
    pub len: usize,
}

/// Receives low-level events from a [`Connection`](crate::transport::Connection).
///
/// Every method has an empty default.
pub trait ConnectionDebugVisitor {
    /// A packet went out
    fn on_packet_sent(&self, _len: usize) {}
    /// A packet came in
    fn on_packet_received(&self, _local: SocketAddr, _peer: SocketAddr, _len: usize) {}
    /// We sent a handshake message
    fn on_crypto_handshake_message_sent(&self, _message: &CryptoHandshakeMessage) {}
    /// We received a handshake message
    fn on_crypto_handshake_message_received(&self, _message: &CryptoHandshakeMessage) {}
    /// The connection closed
    fn on_connection_closed(&self, _error: QuicErrorCode, _from_peer: bool) {}
    /// Version negotiation completed
    fn on_successful_version_negotiation(&self, _version: QuicVersion) {}
}

/// Running totals kept by the [`ConnectionLogger`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_received: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Handshake messages sent
    pub handshake_messages_sent: u64,
    /// Handshake messages received
    pub handshake_messages_received: u64,
}

/// Logs connection events via `tracing`, within the owning session's span
#[derive(Debug)]
pub struct ConnectionLogger {
    span: Span,
    stats: Cell<LoggerStats>,
}

impl ConnectionLogger {
    /// Constructor
    #[must_use]
    pub fn new(span: Span) -> Self {
        Self {
            span,
            stats: Cell::default(),
        }
    }

    /// Accessor
    #[must_use]
    pub fn stats(&self) -> LoggerStats {
        self.stats.get()
    }

    fn update(&self, f: impl FnOnce(&mut LoggerStats)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }
}

impl ConnectionDebugVisitor for ConnectionLogger {
    fn on_packet_sent(&self, len: usize) {
        self.update(|s| s.packets_sent += 1);
        self.span.in_scope(|| trace!("sent packet, {len} bytes"));
    }

    fn on_packet_received(&self, local: SocketAddr, peer: SocketAddr, len: usize) {
        self.update(|s| {
            s.packets_received += 1;
            s.bytes_received += len as u64;
        });
        self.span.in_scope(|| {
            trace!(
                "received packet {peer} -> {local}, {}",
                len.human_count_bytes()
            );
        });
    }

    fn on_crypto_handshake_message_sent(&self, message: &CryptoHandshakeMessage) {
        self.update(|s| s.handshake_messages_sent += 1);
        self.span
            .in_scope(|| debug!("sent handshake message {} ({} bytes)", message.tag, message.len));
    }

    fn on_crypto_handshake_message_received(&self, message: &CryptoHandshakeMessage) {
        self.update(|s| s.handshake_messages_received += 1);
        self.span.in_scope(|| {
            debug!(
                "received handshake message {} ({} bytes)",
                message.tag, message.len
            );
        });
    }

    fn on_connection_closed(&self, error: QuicErrorCode, from_peer: bool) {
        let who = if from_peer { "peer" } else { "us" };
        self.span
            .in_scope(|| debug!("connection closed by {who}: {error}"));
    }

    fn on_successful_version_negotiation(&self, version: QuicVersion) {
        self.span
            .in_scope(|| debug!("negotiated version {version}"));
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{ConnectionDebugVisitor as _, ConnectionLogger, CryptoHandshakeMessage};
    use pretty_assertions::assert_eq;

    #[test]
    fn counts() {
        let logger = ConnectionLogger::new(tracing::Span::none());
        let addr = "127.0.0.1:443".parse().unwrap();
        logger.on_packet_received(addr, addr, 1200);
        logger.on_packet_received(addr, addr, 100);
        logger.on_packet_sent(1350);
        let chlo = CryptoHandshakeMessage {
            tag: "CHLO".into(),
            len: 1024,
        };
        logger.on_crypto_handshake_message_sent(&chlo);
        let stats = logger.stats();
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.bytes_received, 1300);
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.handshake_messages_sent, 1);
        assert_eq!(stats.handshake_messages_received, 0);
    }
}
