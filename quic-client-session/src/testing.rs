//! Scriptable stand-ins for a session's collaborators.
//!
//! Each fake is a cheap handle onto shared state, so a test can give one clone
//! to the session and keep another to script behaviour and inspect what happened.
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;

use crate::config::SessionConfig;
use crate::error::{QuicErrorCode, RstStreamErrorCode};
use crate::logger::ConnectionDebugVisitor;
use crate::metrics::RecordingMetrics;
use crate::session::{ClientSession, SessionOwner};
use crate::transport::{
    Connection, ConnectionEvent, CryptoClientStream, DatagramSocket, ReadCallback, ReadResult,
};
use crate::types::{
    ConnectionId, CryptoHandshakeEvent, HostPortPair, QuicVersion, ServerKey, StreamId,
};
use crate::util::LocalTaskQueue;

/// Address the fakes report for the local end
pub const LOCAL_ADDRESS: &str = "127.0.0.1:50000";
/// Address the fakes report for the peer
pub const PEER_ADDRESS: &str = "192.0.2.1:443";

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// Shared state of a [`FakeConnection`]
#[derive(derive_more::Debug)]
pub struct FakeConnectionState {
    /// Reported by `connected()`
    pub connected: bool,
    /// Id the next outgoing stream will get
    pub next_stream_id: StreamId,
    /// Reported by `version()`
    pub version: QuicVersion,
    /// Reported by `connection_id()`
    pub connection_id: ConnectionId,
    /// Datagrams passed to `process_udp_packet`
    pub packets: Vec<Bytes>,
    /// Events to report for each successive packet; an empty script yields no events
    pub scripted_events: VecDeque<Vec<ConnectionEvent>>,
    /// Calls to `close_connection`
    pub close_calls: Vec<(QuicErrorCode, bool)>,
    /// Calls to `send_rst_stream`
    pub rst_streams: Vec<(StreamId, RstStreamErrorCode, u64)>,
    /// Events forwarded by the session after handling them
    pub handshake_events: Vec<CryptoHandshakeEvent>,
    /// The installed debug visitor
    #[debug(skip)]
    pub debug_visitor: Option<Rc<dyn ConnectionDebugVisitor>>,
}

impl Default for FakeConnectionState {
    fn default() -> Self {
        Self {
            connected: true,
            // client-initiated streams are odd and 1 is the crypto stream
            next_stream_id: 3,
            version: QuicVersion(25),
            connection_id: 0x1234_5678,
            packets: Vec::new(),
            scripted_events: VecDeque::new(),
            close_calls: Vec::new(),
            rst_streams: Vec::new(),
            handshake_events: Vec::new(),
            debug_visitor: None,
        }
    }
}

/// A [`Connection`] that reports whatever it is told to
#[derive(Clone, Debug, Default)]
pub struct FakeConnection(pub Rc<RefCell<FakeConnectionState>>);

impl FakeConnection {
    /// Queues the events to report for the next packet not yet scripted
    pub fn script(&self, events: Vec<ConnectionEvent>) {
        self.0.borrow_mut().scripted_events.push_back(events);
    }
}

impl Connection for FakeConnection {
    fn connected(&self) -> bool {
        self.0.borrow().connected
    }

    fn connection_id(&self) -> ConnectionId {
        self.0.borrow().connection_id
    }

    fn version(&self) -> QuicVersion {
        self.0.borrow().version
    }

    fn peer_address(&self) -> Option<SocketAddr> {
        Some(addr(PEER_ADDRESS))
    }

    fn set_debug_visitor(&mut self, visitor: Option<Rc<dyn ConnectionDebugVisitor>>) {
        self.0.borrow_mut().debug_visitor = visitor;
    }

    fn process_udp_packet(
        &mut self,
        _local: SocketAddr,
        _peer: SocketAddr,
        packet: &[u8],
    ) -> Vec<ConnectionEvent> {
        let mut state = self.0.borrow_mut();
        state.packets.push(Bytes::copy_from_slice(packet));
        let events = state.scripted_events.pop_front().unwrap_or_default();
        if events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ConnectionClosed { .. }))
        {
            state.connected = false;
        }
        events
    }

    fn close_connection(&mut self, error: QuicErrorCode, send_goaway: bool) {
        let mut state = self.0.borrow_mut();
        state.connected = false;
        state.close_calls.push((error, send_goaway));
    }

    fn next_outgoing_stream_id(&mut self) -> StreamId {
        let mut state = self.0.borrow_mut();
        let id = state.next_stream_id;
        state.next_stream_id += 2;
        id
    }

    fn send_rst_stream(&mut self, id: StreamId, error: RstStreamErrorCode, bytes_written: u64) {
        self.0.borrow_mut().rst_streams.push((id, error, bytes_written));
    }

    fn on_crypto_handshake_event(&mut self, event: CryptoHandshakeEvent) {
        self.0.borrow_mut().handshake_events.push(event);
    }
}

/// What a [`FakeSocket`] does on its next read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedRead {
    /// Completes immediately with this datagram
    Data(Bytes),
    /// Completes immediately with this error
    Error(ErrorKind),
    /// Does not complete until [`FakeSocket::complete_read`] is called
    Pending,
}

/// Shared state of a [`FakeSocket`]
#[derive(derive_more::Debug, Default)]
pub struct FakeSocketState {
    /// What successive reads do. When empty, reads are pending.
    pub reads: VecDeque<ScriptedRead>,
    /// The callback of the read in flight
    #[debug(skip)]
    pub pending: Option<ReadCallback>,
    /// Number of calls to `read`
    pub read_calls: usize,
    /// Whether `close` was called
    pub closed: bool,
    /// When set, `local_address` fails
    pub address_error: Option<ErrorKind>,
}

/// A [`DatagramSocket`] that reads from a script
#[derive(Clone, Debug, Default)]
pub struct FakeSocket(pub Rc<RefCell<FakeSocketState>>);

impl FakeSocket {
    /// Appends to the read script
    pub fn push_read(&self, read: ScriptedRead) {
        self.0.borrow_mut().reads.push_back(read);
    }

    /// Whether a read is in flight
    #[must_use]
    pub fn has_pending_read(&self) -> bool {
        self.0.borrow().pending.is_some()
    }

    /// Completes the read in flight, as the event loop would.
    /// Returns false if there was none.
    pub fn complete_read(&self, result: std::io::Result<Bytes>) -> bool {
        let callback = self.0.borrow_mut().pending.take();
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }
}

impl DatagramSocket for FakeSocket {
    fn read(&mut self, _buf_size: usize, callback: ReadCallback) -> ReadResult {
        let mut state = self.0.borrow_mut();
        state.read_calls += 1;
        if state.closed {
            return ReadResult::Ready(Err(ErrorKind::NotConnected.into()));
        }
        match state.reads.pop_front() {
            Some(ScriptedRead::Data(data)) => ReadResult::Ready(Ok(data)),
            Some(ScriptedRead::Error(kind)) => ReadResult::Ready(Err(kind.into())),
            Some(ScriptedRead::Pending) | None => {
                state.pending = Some(callback);
                ReadResult::Pending
            }
        }
    }

    fn local_address(&self) -> std::io::Result<SocketAddr> {
        match self.0.borrow().address_error {
            Some(kind) => Err(kind.into()),
            None => Ok(addr(LOCAL_ADDRESS)),
        }
    }

    fn peer_address(&self) -> std::io::Result<SocketAddr> {
        Ok(addr(PEER_ADDRESS))
    }

    fn close(&mut self) {
        let mut state = self.0.borrow_mut();
        state.closed = true;
        state.pending = None;
    }
}

/// Shared state of a [`FakeCryptoStream`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeCryptoState {
    /// Returned by `crypto_connect`
    pub connect_succeeds: bool,
    /// Reported by `encryption_established`
    pub encryption_established: bool,
    /// Reported by `handshake_confirmed`
    pub handshake_confirmed: bool,
    /// Reported by `num_sent_client_hellos`
    pub num_sent_client_hellos: u32,
    /// Number of calls to `crypto_connect`
    pub connect_calls: usize,
}

impl Default for FakeCryptoState {
    fn default() -> Self {
        Self {
            connect_succeeds: true,
            encryption_established: false,
            handshake_confirmed: false,
            num_sent_client_hellos: 0,
            connect_calls: 0,
        }
    }
}

/// A [`CryptoClientStream`] whose progress is set by the test
#[derive(Clone, Debug, Default)]
pub struct FakeCryptoStream(pub Rc<RefCell<FakeCryptoState>>);

impl FakeCryptoStream {
    /// Marks encryption as established
    pub fn establish(&self) {
        self.0.borrow_mut().encryption_established = true;
    }

    /// Marks the handshake as confirmed (which implies encryption)
    pub fn confirm(&self) {
        let mut state = self.0.borrow_mut();
        state.encryption_established = true;
        state.handshake_confirmed = true;
    }
}

impl CryptoClientStream for FakeCryptoStream {
    fn crypto_connect(&mut self) -> bool {
        let mut state = self.0.borrow_mut();
        state.connect_calls += 1;
        if state.connect_succeeds {
            state.num_sent_client_hellos += 1;
        }
        state.connect_succeeds
    }

    fn encryption_established(&self) -> bool {
        self.0.borrow().encryption_established
    }

    fn handshake_confirmed(&self) -> bool {
        self.0.borrow().handshake_confirmed
    }

    fn num_sent_client_hellos(&self) -> u32 {
        self.0.borrow().num_sent_client_hellos
    }
}

/// A notification received by a [`RecordingOwner`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerEvent {
    /// `on_session_going_away`
    GoingAway,
    /// `on_idle_session`
    Idle,
    /// `on_session_closed`
    Closed,
}

/// A [`SessionOwner`] that writes down what it is told
#[derive(Debug, Default)]
pub struct RecordingOwner {
    events: RefCell<Vec<OwnerEvent>>,
}

impl RecordingOwner {
    /// Everything received so far, in order
    #[must_use]
    pub fn events(&self) -> Vec<OwnerEvent> {
        self.events.borrow().clone()
    }

    /// How many times `event` was received
    #[must_use]
    pub fn count(&self, event: OwnerEvent) -> usize {
        self.events.borrow().iter().filter(|e| **e == event).count()
    }
}

impl SessionOwner for RecordingOwner {
    fn on_session_going_away(&self, _session: &ClientSession) {
        self.events.borrow_mut().push(OwnerEvent::GoingAway);
    }

    fn on_idle_session(&self, _session: &ClientSession) {
        self.events.borrow_mut().push(OwnerEvent::Idle);
    }

    fn on_session_closed(&self, _session: &ClientSession) {
        self.events.borrow_mut().push(OwnerEvent::Closed);
    }
}

/// A session wired to fakes, with handles onto all of them
#[derive(Debug)]
pub struct Harness {
    /// The session under test
    pub session: Rc<ClientSession>,
    /// Its connection
    pub connection: FakeConnection,
    /// Its socket
    pub socket: FakeSocket,
    /// Its crypto stream
    pub crypto: FakeCryptoStream,
    /// Its owner
    pub owner: Rc<RecordingOwner>,
    /// Its metrics sink
    pub metrics: RecordingMetrics,
    /// Its event loop
    pub tasks: Rc<LocalTaskQueue>,
}

impl Harness {
    /// Server the harness session talks to
    #[must_use]
    pub fn server_key() -> ServerKey {
        ServerKey::new(HostPortPair::new("www.example.org", 443), true)
    }

    /// A session with the given stream limit, before any handshake
    #[must_use]
    pub fn new(max_open_streams: usize) -> Self {
        let config = SessionConfig {
            max_open_streams,
            ..*SessionConfig::system_default()
        };
        Self::with_config(config)
    }

    /// A session with the given configuration, before any handshake
    #[must_use]
    pub fn with_config(config: SessionConfig) -> Self {
        let connection = FakeConnection::default();
        let socket = FakeSocket::default();
        let crypto = FakeCryptoStream::default();
        let owner = Rc::new(RecordingOwner::default());
        let metrics = RecordingMetrics::new();
        let tasks = Rc::new(LocalTaskQueue::new());
        let session = ClientSession::builder(
            Box::new(connection.clone()),
            Box::new(socket.clone()),
            Box::new(crypto.clone()),
            Self::server_key(),
        )
        .owner(&owner)
        .config(config)
        .metrics(metrics.clone())
        .task_runner(Rc::clone(&tasks))
        .build();
        Self {
            session,
            connection,
            socket,
            crypto,
            owner,
            metrics,
            tasks,
        }
    }

    /// A session with encryption established
    #[must_use]
    pub fn established(max_open_streams: usize) -> Self {
        let h = Self::new(max_open_streams);
        h.crypto.establish();
        h
    }
}
