//! Error types
// (c) 2025 Ross Younger

use std::io::ErrorKind;

use thiserror::Error;

/// Errors surfaced by the session to its callers, observers and streams.
///
/// From the point of view of a caller wanting a stream, every way a session can
/// become unusable collapses into [`NetError::ConnectionClosed`]; the caller is
/// expected to obtain a fresh session rather than retry on the same one.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash)]
pub enum NetError {
    /// The session cannot (or can no longer) carry new streams
    #[error("connection closed")]
    ConnectionClosed,
    /// The crypto handshake could not be started
    #[error("connection failed")]
    ConnectionFailed,
    /// The peer reset a stream or the connection
    #[error("connection reset")]
    ConnectionReset,
    /// The handshake or the connection failed at the QUIC layer
    #[error("QUIC protocol error")]
    QuicProtocolError,
    /// The session closed underneath an open stream or observer
    #[error("unexpected error")]
    Unexpected,
    /// A queued request was abandoned because the session went away
    #[error("operation aborted")]
    Aborted,
    /// The socket reported an I/O error
    #[error("socket error: {0}")]
    Io(ErrorKind),
}

impl NetError {
    /// The classic numeric net error code, for diagnostics.
    ///
    /// These are negative and stable; they are what the metrics sink sees.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::Unexpected => -9,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionFailed => -104,
            NetError::QuicProtocolError => -356,
            NetError::Io(kind) => match kind {
                ErrorKind::ConnectionRefused => -102,
                ErrorKind::ConnectionReset => -101,
                ErrorKind::ConnectionAborted => -103,
                ErrorKind::NotConnected => -15,
                ErrorKind::AddrNotAvailable => -108,
                ErrorKind::TimedOut => -118,
                _ => -2,
            },
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(e.kind())
    }
}

/// Error codes carried by a QUIC connection close.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum QuicErrorCode {
    /// Orderly shutdown
    NoError = 0,
    /// Something unexpected happened locally
    InternalError = 1,
    /// The peer sent data we could not parse
    InvalidPacketHeader = 3,
    /// A stream was used incorrectly
    InvalidStreamId = 17,
    /// The peer is going away
    PeerGoingAway = 16,
    /// Reading from the socket failed
    PacketReadError = 51,
    /// The connection was idle for too long
    ConnectionTimedOut = 25,
    /// Version negotiation failed
    InvalidVersion = 20,
    /// The crypto handshake failed
    HandshakeFailed = 28,
    /// The peer's proof could not be verified
    ProofInvalid = 42,
}

impl QuicErrorCode {
    /// The on-wire numeric value of this code
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Error codes carried by a RST_STREAM frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RstStreamErrorCode {
    /// Complete response has been sent; no error
    StreamNoError,
    /// Something went wrong locally
    ErrorProcessingStream,
    /// The stream was cancelled by the application
    StreamCancelled,
    /// The peer refused the stream
    RefusedStream,
    /// The connection is going away
    StreamConnectionError,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{NetError, QuicErrorCode};
    use pretty_assertions::assert_eq;
    use std::io::ErrorKind;

    #[test]
    fn net_error_codes() {
        assert_eq!(NetError::ConnectionClosed.code(), -100);
        assert_eq!(NetError::QuicProtocolError.code(), -356);
        assert_eq!(NetError::Io(ErrorKind::TimedOut).code(), -118);
        assert_eq!(NetError::Io(ErrorKind::Other).code(), -2);
    }

    #[test]
    fn io_errors_convert() {
        let e = std::io::Error::new(ErrorKind::ConnectionRefused, "nope");
        assert_eq!(NetError::from(e), NetError::Io(ErrorKind::ConnectionRefused));
    }

    #[test]
    fn quic_error_display() {
        assert_eq!(
            QuicErrorCode::ConnectionTimedOut.to_string(),
            "CONNECTION_TIMED_OUT"
        );
        assert_eq!(QuicErrorCode::PacketReadError.as_u32(), 51);
    }
}
