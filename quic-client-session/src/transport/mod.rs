//! Interfaces to the collaborators a session drives: the datagram socket,
//! the QUIC connection and the crypto handshake stream.
//!
//! The session does not know how packets are framed, encrypted or
//! acknowledged. It hands received datagrams to a [`Connection`] and reacts to
//! the [`ConnectionEvent`]s the connection reports back.
//!
//! All of these run on the single thread that owns the session; none of them
//! need to be `Send`.
// (c) 2025 Ross Younger

use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::{QuicErrorCode, RstStreamErrorCode};
use crate::logger::ConnectionDebugVisitor;
use crate::types::{ConnectionId, CryptoHandshakeEvent, QuicVersion, StreamId};

mod udp;
pub use udp::UdpTransport;

/// Callback type for an asynchronous socket read
pub type ReadCallback = Box<dyn FnOnce(std::io::Result<Bytes>)>;

/// Result of [`DatagramSocket::read`]
#[derive(Debug)]
pub enum ReadResult {
    /// A datagram (or an error) was available immediately.
    /// The callback has been dropped and will not be called.
    Ready(std::io::Result<Bytes>),
    /// The callback will be invoked from the event loop when a datagram arrives
    Pending,
}

/// A connected datagram socket
pub trait DatagramSocket {
    /// Reads one datagram of at most `buf_size` bytes.
    ///
    /// Implementations must never invoke `callback` from within this call.
    fn read(&mut self, buf_size: usize, callback: ReadCallback) -> ReadResult;
    /// Our address
    fn local_address(&self) -> std::io::Result<SocketAddr>;
    /// The remote address
    fn peer_address(&self) -> std::io::Result<SocketAddr>;
    /// Closes the socket. Any pending read is abandoned; its callback is dropped unrun.
    fn close(&mut self);
}

/// One STREAM frame's worth of data, as seen by the session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame {
    /// Target stream
    pub stream_id: StreamId,
    /// Whether this frame ends the stream
    pub fin: bool,
    /// Offset of this data within the stream
    pub offset: u64,
    /// Payload
    pub data: Bytes,
}

/// Things the connection reports while processing a packet.
///
/// The session dispatches these in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The crypto handshake progressed
    CryptoHandshake(CryptoHandshakeEvent),
    /// The packet carried stream data
    StreamFrames(Vec<StreamFrame>),
    /// The peer reset a stream
    RstStream {
        /// Stream being reset
        stream_id: StreamId,
        /// Reason
        error: RstStreamErrorCode,
    },
    /// The peer will accept no new streams
    GoAway {
        /// Highest stream the peer promises to process
        last_good_stream_id: StreamId,
    },
    /// Version negotiation completed
    VersionNegotiated(QuicVersion),
    /// The connection is now closed
    ConnectionClosed {
        /// Why
        error: QuicErrorCode,
        /// Whether the peer initiated the close
        from_peer: bool,
    },
}

/// The QUIC connection underneath a session
pub trait Connection {
    /// Whether the connection is still usable
    fn connected(&self) -> bool;
    /// Our connection id
    fn connection_id(&self) -> ConnectionId;
    /// The negotiated version
    fn version(&self) -> QuicVersion;
    /// The last known peer address
    fn peer_address(&self) -> Option<SocketAddr>;
    /// Installs (or, with `None`, removes) the debug visitor
    fn set_debug_visitor(&mut self, visitor: Option<std::rc::Rc<dyn ConnectionDebugVisitor>>);
    /// Processes one received datagram and returns the events it produced
    fn process_udp_packet(
        &mut self,
        local: SocketAddr,
        peer: SocketAddr,
        packet: &[u8],
    ) -> Vec<ConnectionEvent>;
    /// Closes the connection locally.
    ///
    /// After this returns, [`connected()`](Connection::connected) must be false.
    fn close_connection(&mut self, error: QuicErrorCode, send_goaway: bool);
    /// Allocates the id for the next outgoing stream
    fn next_outgoing_stream_id(&mut self) -> StreamId;
    /// Sends a RST_STREAM frame
    fn send_rst_stream(&mut self, id: StreamId, error: RstStreamErrorCode, bytes_written: u64);
    /// Notified after the session has handled a crypto handshake event
    fn on_crypto_handshake_event(&mut self, _event: CryptoHandshakeEvent) {}
}

/// The client side of the crypto handshake
pub trait CryptoClientStream {
    /// Starts the handshake. Returns false if it could not be started.
    fn crypto_connect(&mut self) -> bool;
    /// Whether the client may now send encrypted data
    fn encryption_established(&self) -> bool;
    /// Whether the handshake has been confirmed
    fn handshake_confirmed(&self) -> bool;
    /// How many client hellos have been sent so far
    fn num_sent_client_hellos(&self) -> u32;
}
