//! Diagnostic snapshot of a session
// (c) 2025 Ross Younger

use serde::Serialize;

/// What a session looks like right now, for a diagnostics page.
///
/// Serializes to a flat JSON object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// The first alias the session is known by
    pub host_port_pair: String,
    /// Negotiated QUIC version
    pub version: String,
    /// Currently open streams
    pub open_streams: usize,
    /// Streams created over the session's lifetime
    pub total_streams: u64,
    /// Peer address, or empty if not known
    pub peer_address: String,
    /// Connection id, in decimal
    pub connection_id: String,
    /// Whether the connection is still usable
    pub connected: bool,
    /// Whether a server certificate was verified
    pub secure: bool,
    /// Every alias the session is known by, in order
    pub aliases: Vec<String>,
}
