//! The client end of a QUIC session.
//!
//! A [`ClientSession`] sits between a [`Connection`] and the code that wants
//! streams over it. It
//! * drives the crypto handshake and tells the caller when the session is usable,
//! * hands out outgoing streams, queueing requests beyond the stream limit,
//! * pumps datagrams from the socket into the connection,
//! * tears everything down, exactly once, when the connection closes, and
//! * keeps its [`SessionOwner`] informed so the owner's pool stays accurate.
//!
//! The session is single threaded and shared as `Rc<ClientSession>`. Callbacks
//! and deferred tasks hold a weak reference and do nothing if the session has
//! been dropped in the meantime. Any callback the session makes (to a caller,
//! an observer or the owner) may drop the last strong reference to it; the
//! session never holds a borrow of its own state across such a call.
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use tracing::{Span, debug, debug_span, error, trace, warn};

use crate::cert::{CertVerifyResult, SslInfo};
use crate::config::SessionConfig;
use crate::error::{NetError, QuicErrorCode, RstStreamErrorCode};
use crate::logger::{ConnectionDebugVisitor as _, ConnectionLogger, CryptoHandshakeMessage, LoggerStats};
use crate::metrics::{Location, MetricsSink, Sample, TracingMetrics};
use crate::server_info::{CachedState, ServerInfo, ServerInfoState};
use crate::transport::{
    Connection, ConnectionEvent, CryptoClientStream, DatagramSocket, ReadResult, StreamFrame,
};
use crate::types::{
    ConnectionId, CryptoHandshakeEvent, HandshakeState, HostPortPair, Outcome, QuicVersion,
    ServerKey, StreamId,
};
use crate::util::{TaskRunner, TokioTaskRunner};

mod info;
mod observer;
mod request;
mod stream;

pub use info::SessionInfo;
#[cfg(test)]
pub(crate) use observer::{MockSessionObserver, MockSessionOwner};
pub use observer::{SessionObserver, SessionOwner};
pub(crate) use request::RequestSlot;
pub use request::{StreamCallback, StreamRequest};
pub use stream::ClientStream;


/// Completion callback for [`ClientSession::crypto_connect`]
pub type ConnectCallback = Box<dyn FnOnce(Result<(), NetError>)>;

/// Progress of the owner's "session closed" notification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum CloseNotification {
    #[default]
    NotSent,
    Scheduled,
    Sent,
}

#[derive(derive_more::Debug)]
struct Inner {
    #[debug(skip)]
    connection: Box<dyn Connection>,
    #[debug(skip)]
    socket: Box<dyn DatagramSocket>,
    #[debug(skip)]
    crypto_stream: Box<dyn CryptoClientStream>,
    #[debug(skip)]
    server_info: Option<Box<dyn ServerInfo>>,
    streams: BTreeMap<StreamId, ClientStream>,
    stream_requests: VecDeque<Rc<RequestSlot>>,
    #[debug(skip)]
    observers: Vec<Weak<dyn SessionObserver>>,
    #[debug(skip)]
    connect_callback: Option<ConnectCallback>,
    require_confirmation: bool,
    going_away: bool,
    goaway_received: bool,
    connection_closed: bool,
    close_notification: CloseNotification,
    num_total_streams: u64,
    read_pending: bool,
    num_packets_read: u32,
    cert_verify_result: Option<CertVerifyResult>,
}

/// Assembles a [`ClientSession`]
#[derive(derive_more::Debug)]
pub struct SessionBuilder {
    #[debug(skip)]
    connection: Box<dyn Connection>,
    #[debug(skip)]
    socket: Box<dyn DatagramSocket>,
    #[debug(skip)]
    crypto_stream: Box<dyn CryptoClientStream>,
    server_key: ServerKey,
    #[debug(skip)]
    owner: Option<Weak<dyn SessionOwner>>,
    config: SessionConfig,
    #[debug(skip)]
    metrics: Rc<dyn MetricsSink>,
    #[debug(skip)]
    task_runner: Rc<dyn TaskRunner>,
    #[debug(skip)]
    server_info: Option<Box<dyn ServerInfo>>,
}

impl SessionBuilder {
    /// Sets the owner, which is held weakly
    #[must_use]
    pub fn owner<O: SessionOwner + 'static>(mut self, owner: &Rc<O>) -> Self {
        let owner: Weak<dyn SessionOwner> = Rc::<O>::downgrade(owner);
        self.owner = Some(owner);
        self
    }

    /// Sets the configuration. Defaults to [`SessionConfig::system_default`].
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the metrics sink. Defaults to [`TracingMetrics`].
    #[must_use]
    pub fn metrics<M: MetricsSink + 'static>(mut self, metrics: M) -> Self {
        let metrics: Rc<dyn MetricsSink> = Rc::new(metrics);
        self.metrics = metrics;
        self
    }

    /// Sets where deferred work runs. Defaults to [`TokioTaskRunner`].
    #[must_use]
    pub fn task_runner<R: TaskRunner + 'static>(mut self, runner: Rc<R>) -> Self {
        let runner: Rc<dyn TaskRunner> = runner;
        self.task_runner = runner;
        self
    }

    /// Sets the store for the server's crypto state
    #[must_use]
    pub fn server_info<S: ServerInfo + 'static>(mut self, server_info: S) -> Self {
        let server_info: Box<dyn ServerInfo> = Box::new(server_info);
        self.server_info = Some(server_info);
        self
    }

    /// Creates the session and attaches its logger to the connection
    #[must_use]
    pub fn build(self) -> Rc<ClientSession> {
        let span = debug_span!("SESSION", server = %self.server_key);
        let logger = Rc::new(ConnectionLogger::new(span.clone()));
        let mut connection = self.connection;
        let visitor: Rc<dyn crate::logger::ConnectionDebugVisitor> = logger.clone();
        connection.set_debug_visitor(Some(visitor));
        span.in_scope(|| debug!("created session, connection id {}", connection.connection_id()));

        Rc::new_cyclic(|weak_self| ClientSession {
            inner: RefCell::new(Inner {
                connection,
                socket: self.socket,
                crypto_stream: self.crypto_stream,
                server_info: self.server_info,
                streams: BTreeMap::new(),
                stream_requests: VecDeque::new(),
                observers: Vec::new(),
                connect_callback: None,
                require_confirmation: false,
                going_away: false,
                goaway_received: false,
                connection_closed: false,
                close_notification: CloseNotification::NotSent,
                num_total_streams: 0,
                read_pending: false,
                num_packets_read: 0,
                cert_verify_result: None,
            }),
            weak_self: weak_self.clone(),
            span,
            logger,
            server_key: self.server_key,
            owner: self.owner,
            config: self.config,
            metrics: self.metrics,
            task_runner: self.task_runner,
        })
    }
}

/// The client end of a QUIC session. See the [module documentation](self).
#[derive(derive_more::Debug)]
pub struct ClientSession {
    inner: RefCell<Inner>,
    #[debug(skip)]
    weak_self: Weak<ClientSession>,
    span: Span,
    logger: Rc<ConnectionLogger>,
    server_key: ServerKey,
    #[debug(skip)]
    owner: Option<Weak<dyn SessionOwner>>,
    config: SessionConfig,
    #[debug(skip)]
    metrics: Rc<dyn MetricsSink>,
    #[debug(skip)]
    task_runner: Rc<dyn TaskRunner>,
}

impl ClientSession {
    /// Starts assembling a session over the given collaborators
    #[must_use]
    pub fn builder(
        connection: Box<dyn Connection>,
        socket: Box<dyn DatagramSocket>,
        crypto_stream: Box<dyn CryptoClientStream>,
        server_key: ServerKey,
    ) -> SessionBuilder {
        let metrics: Rc<dyn MetricsSink> = Rc::new(TracingMetrics);
        let task_runner: Rc<dyn TaskRunner> = Rc::new(TokioTaskRunner);
        SessionBuilder {
            connection,
            socket,
            crypto_stream,
            server_key,
            owner: None,
            config: *SessionConfig::system_default(),
            metrics,
            task_runner,
            server_info: None,
        }
    }

    fn weak(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    fn owner(&self) -> Option<Rc<dyn SessionOwner>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    // HANDSHAKE ////////////////////////////////////////////////////////////////////

    /// Starts the crypto handshake.
    ///
    /// If `require_confirmation` is set the session is only usable once the
    /// handshake is confirmed; otherwise established encryption is enough.
    ///
    /// * `Ok(Outcome::Done(()))`: already usable; `callback` is dropped unrun.
    /// * `Ok(Outcome::Pending)`: `callback` fires once, with `Ok` when the
    ///   session becomes usable or an error if the connection closes first.
    /// * `Err(NetError::ConnectionFailed)`: the handshake could not be started.
    ///
    /// A callback still pending from an earlier call is answered with
    /// `Err(NetError::Aborted)` before this returns.
    pub fn crypto_connect<F>(
        &self,
        require_confirmation: bool,
        callback: F,
    ) -> Result<Outcome<()>, NetError>
    where
        F: FnOnce(Result<(), NetError>) + 'static,
    {
        let _span = self.span.enter();
        self.metrics
            .record(Sample::HandshakeState(HandshakeState::Started));
        let (result, superseded) = {
            let mut inner = self.inner.borrow_mut();
            inner.require_confirmation = require_confirmation;
            let superseded = inner.connect_callback.take();
            let result = if inner.crypto_stream.crypto_connect() {
                let usable = if require_confirmation {
                    inner.crypto_stream.handshake_confirmed()
                } else {
                    inner.crypto_stream.encryption_established()
                };
                if usable {
                    Ok(Outcome::Done(()))
                } else {
                    let callback: ConnectCallback = Box::new(callback);
                    inner.connect_callback = Some(callback);
                    Ok(Outcome::Pending)
                }
            } else {
                warn!("failed to start crypto handshake");
                Err(NetError::ConnectionFailed)
            };
            (result, superseded)
        };
        // a pending connect is only ever answered once
        if let Some(previous) = superseded {
            debug!("crypto connect restarted; abandoning the earlier caller");
            previous(Err(NetError::Aborted));
        }
        result
    }

    /// Starts the crypto handshake and waits until the session is usable
    pub async fn connect(&self, require_confirmation: bool) -> Result<(), NetError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let outcome = self.crypto_connect(require_confirmation, move |result| {
            let _ = tx.send(result);
        })?;
        match outcome {
            Outcome::Done(()) => Ok(()),
            Outcome::Pending => rx.await.unwrap_or(Err(NetError::Aborted)),
        }
    }

    /// Reacts to handshake progress reported by the crypto stream
    pub fn on_crypto_handshake_event(&self, event: CryptoHandshakeEvent) {
        let _span = self.span.enter();
        debug!("crypto handshake event: {event}");
        let callback = {
            let mut inner = self.inner.borrow_mut();
            if !inner.require_confirmation || event == CryptoHandshakeEvent::HandshakeConfirmed {
                inner.connect_callback.take()
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback(Ok(()));
        }
        if event == CryptoHandshakeEvent::HandshakeConfirmed {
            self.notify_observers_handshake_confirmed();
        }
        self.inner
            .borrow_mut()
            .connection
            .on_crypto_handshake_event(event);
    }

    /// Logs an outgoing handshake message
    pub fn on_crypto_handshake_message_sent(&self, message: &CryptoHandshakeMessage) {
        self.logger.on_crypto_handshake_message_sent(message);
    }

    /// Logs an incoming handshake message
    pub fn on_crypto_handshake_message_received(&self, message: &CryptoHandshakeMessage) {
        self.logger.on_crypto_handshake_message_received(message);
    }

    /// Records the outcome of verifying the server's proof
    pub fn on_proof_verify_details_available(&self, result: &CertVerifyResult) {
        self.inner.borrow_mut().cert_verify_result = Some(result.clone());
    }

    /// The server's proof checked out; persists its crypto state if the store is ready
    pub fn on_proof_valid(&self, cached: &CachedState) {
        let _span = self.span.enter();
        if !cached.proof_valid {
            warn!("proof reported valid, but cached state disagrees");
        }
        let mut inner = self.inner.borrow_mut();
        let Some(store) = inner.server_info.as_mut() else {
            return;
        };
        if !store.is_ready_to_persist() {
            trace!("server info store not ready; not persisting");
            return;
        }
        store.persist(ServerInfoState::from(cached));
    }

    /// Logs a completed version negotiation
    pub fn on_successful_version_negotiation(&self, version: QuicVersion) {
        self.logger.on_successful_version_negotiation(version);
    }

    /// The TLS summary of the session, once the server's proof has been verified
    #[must_use]
    pub fn ssl_info(&self) -> Option<SslInfo> {
        self.inner
            .borrow()
            .cert_verify_result
            .as_ref()
            .map(SslInfo::from_verify_result)
    }

    /// Whether the session has a verified server certificate
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner
            .borrow()
            .cert_verify_result
            .as_ref()
            .is_some_and(|r| r.verified_cert.is_some())
    }

    /// Whether requests for `hostname` may share this session.
    ///
    /// An insecure session can be shared freely; a secure one only if its
    /// certificate is valid for `hostname`.
    #[must_use]
    pub fn can_pool(&self, hostname: &str) -> bool {
        let inner = self.inner.borrow();
        match inner
            .cert_verify_result
            .as_ref()
            .and_then(|r| r.verified_cert.as_ref())
        {
            Some(cert) => cert.verify_name_match(hostname),
            None => true,
        }
    }

    // STREAMS //////////////////////////////////////////////////////////////////////

    fn check_can_create_stream(&self, inner: &Inner, location: Location) -> Result<(), NetError> {
        if !inner.crypto_stream.encryption_established() {
            debug!("encryption not yet established; no streams");
            return Err(NetError::ConnectionClosed);
        }
        if inner.goaway_received {
            debug!("peer sent GOAWAY; no new streams");
            return Err(NetError::ConnectionClosed);
        }
        if !inner.connection.connected() {
            debug!("connection closed; no new streams");
            return Err(NetError::ConnectionClosed);
        }
        if inner.going_away {
            self.metrics.record(Sample::UnexpectedOpenStreams(location));
            debug!("session going away; no new streams");
            return Err(NetError::ConnectionClosed);
        }
        Ok(())
    }

    fn create_stream_locked(&self, inner: &mut Inner) -> ClientStream {
        debug_assert!(inner.connection.connected());
        let id = inner.connection.next_outgoing_stream_id();
        let stream = ClientStream::new(id);
        let _ = inner.streams.insert(id, stream.clone());
        inner.num_total_streams += 1;
        self.metrics.record(Sample::NumOpenStreams(inner.streams.len()));
        trace!("opened stream {id}, {} now open", inner.streams.len());
        stream
    }

    /// Creates a stream if a slot is free, otherwise queues `slot`
    pub(crate) fn try_create_stream(
        &self,
        slot: &Rc<RequestSlot>,
    ) -> Result<Outcome<ClientStream>, NetError> {
        let _span = self.span.enter();
        let mut inner = self.inner.borrow_mut();
        self.check_can_create_stream(&inner, Location::TryCreateStream)?;
        if inner.streams.len() < self.config.max_open_streams {
            return Ok(Outcome::Done(self.create_stream_locked(&mut inner)));
        }
        inner.stream_requests.push_back(Rc::clone(slot));
        trace!("stream limit reached; {} request(s) queued", inner.stream_requests.len());
        Ok(Outcome::Pending)
    }

    /// Removes `slot` from the request queue, keeping the others in order
    pub(crate) fn cancel_request(&self, slot: &Rc<RequestSlot>) {
        let mut inner = self.inner.borrow_mut();
        if let Some(pos) = inner
            .stream_requests
            .iter()
            .position(|s| Rc::ptr_eq(s, slot))
        {
            let _ = inner.stream_requests.remove(pos);
        }
    }

    /// Creates a stream without queueing.
    ///
    /// Returns `None` if the session cannot create streams right now, including
    /// when the stream limit has been reached.
    pub fn create_outgoing_data_stream(&self) -> Option<ClientStream> {
        let _span = self.span.enter();
        let mut inner = self.inner.borrow_mut();
        if self
            .check_can_create_stream(&inner, Location::CreateOutgoingReliableStream)
            .is_err()
        {
            return None;
        }
        if inner.streams.len() >= self.config.max_open_streams {
            debug!(
                "too many open streams ({} of {})",
                inner.streams.len(),
                self.config.max_open_streams
            );
            return None;
        }
        Some(self.create_stream_locked(&mut inner))
    }

    /// Server push is not supported; streams opened by the server are refused
    pub fn create_incoming_data_stream(&self, id: StreamId) -> Option<ClientStream> {
        let _span = self.span.enter();
        error!("server pushed stream {id}; server push is not supported");
        None
    }

    /// Closes an open stream, then hands the freed slot to the next queued request
    pub fn close_stream(&self, id: StreamId) {
        let removed = self.inner.borrow_mut().streams.remove(&id);
        let Some(stream) = removed else {
            trace!("close_stream: stream {id} is not open");
            return;
        };
        stream.on_closed();
        self.on_closed_stream();
    }

    /// Resets a stream, telling the peer why, then closes it
    pub fn send_rst_stream(&self, id: StreamId, error: RstStreamErrorCode, bytes_written: u64) {
        self.inner
            .borrow_mut()
            .connection
            .send_rst_stream(id, error, bytes_written);
        self.close_stream(id);
    }

    /// A stream slot may have come free: serve the oldest queued request, and
    /// tell the owner if the session is now idle.
    fn on_closed_stream(&self) {
        let _span = self.span.enter();
        let served = {
            let mut inner = self.inner.borrow_mut();
            let can_serve = inner.streams.len() < self.config.max_open_streams
                && !inner.stream_requests.is_empty()
                && inner.crypto_stream.encryption_established()
                && !inner.goaway_received
                && !inner.going_away
                && inner.connection.connected();
            if can_serve {
                inner
                    .stream_requests
                    .pop_front()
                    .map(|slot| (slot, self.create_stream_locked(&mut inner)))
            } else {
                None
            }
        };
        if let Some((slot, stream)) = served {
            if let Some(unwanted) = slot.complete(Ok(stream)) {
                self.close_stream(unwanted.id());
            }
        }
        let idle = self.inner.borrow().streams.is_empty();
        if idle {
            if let Some(owner) = self.owner() {
                owner.on_idle_session(self);
            }
        }
    }

    fn on_stream_frames(&self, frames: &[StreamFrame]) {
        self.metrics.record(Sample::StreamFramesInPacket(frames.len()));
        let mut per_stream = BTreeMap::<StreamId, usize>::new();
        for frame in frames {
            *per_stream.entry(frame.stream_id).or_default() += 1;
        }
        for count in per_stream.values() {
            self.metrics.record(Sample::StreamFramesPerStream(*count));
        }
        let inner = self.inner.borrow();
        for frame in frames {
            match inner.streams.get(&frame.stream_id) {
                Some(stream) => stream.on_frame(frame),
                None => trace!("dropping frame for stream {} which is not open", frame.stream_id),
            }
        }
    }

    fn on_rst_stream(&self, id: StreamId, error: RstStreamErrorCode) {
        debug!("peer reset stream {id}: {error}");
        let removed = self.inner.borrow_mut().streams.remove(&id);
        if let Some(stream) = removed {
            stream.on_error(NetError::ConnectionReset);
            self.on_closed_stream();
        }
    }

    fn on_go_away(&self, last_good_stream_id: StreamId) {
        debug!("peer sent GOAWAY, last good stream {last_good_stream_id}");
        self.inner.borrow_mut().goaway_received = true;
    }

    // OBSERVERS ////////////////////////////////////////////////////////////////////

    /// Registers an observer. Registering the same observer twice has no effect.
    pub fn add_observer<O: SessionObserver + 'static>(&self, observer: &Rc<O>) {
        let mut inner = self.inner.borrow_mut();
        if inner.going_away {
            self.metrics
                .record(Sample::UnexpectedObservers(Location::AddObserver));
        }
        let already = inner
            .observers
            .iter()
            .any(|o| std::ptr::addr_eq(o.as_ptr(), Rc::as_ptr(observer)));
        if already {
            return;
        }
        let weak: Weak<dyn SessionObserver> = Rc::<O>::downgrade(observer);
        inner.observers.push(weak);
    }

    /// Unregisters an observer. Returns whether it was registered.
    pub fn remove_observer<O: SessionObserver + ?Sized>(&self, observer: &Rc<O>) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.observers.len();
        inner
            .observers
            .retain(|o| !std::ptr::addr_eq(o.as_ptr(), Rc::as_ptr(observer)));
        inner.observers.len() != before
    }

    fn notify_observers_handshake_confirmed(&self) {
        let snapshot = self.inner.borrow().observers.clone();
        for weak in snapshot {
            // an earlier observer may have removed this one
            let registered = self
                .inner
                .borrow()
                .observers
                .iter()
                .any(|o| std::ptr::addr_eq(o.as_ptr(), weak.as_ptr()));
            if !registered {
                continue;
            }
            if let Some(observer) = weak.upgrade() {
                observer.on_crypto_handshake_confirmed();
            }
        }
    }

    fn close_all_observers(&self, error: NetError) {
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                if inner.observers.is_empty() {
                    None
                } else {
                    Some(inner.observers.remove(0))
                }
            };
            let Some(weak) = next else {
                break;
            };
            if let Some(observer) = weak.upgrade() {
                observer.on_session_closed(error);
            }
        }
    }

    // TEARDOWN /////////////////////////////////////////////////////////////////////

    fn close_all_streams(&self, error: NetError) {
        loop {
            let next = self.inner.borrow_mut().streams.pop_first();
            let Some((_, stream)) = next else {
                break;
            };
            stream.on_error(error);
        }
    }

    fn fail_stream_requests(&self, error: NetError) {
        loop {
            let next = self.inner.borrow_mut().stream_requests.pop_front();
            let Some(slot) = next else {
                break;
            };
            let _ = slot.complete(Err(error));
        }
    }

    fn notify_owner_going_away(&self) {
        let first = {
            let mut inner = self.inner.borrow_mut();
            !std::mem::replace(&mut inner.going_away, true)
        };
        if first {
            debug!("session going away");
            if let Some(owner) = self.owner() {
                owner.on_session_going_away(self);
            }
        }
    }

    fn record_close_notification_state(&self, inner: &Inner, location: Location) {
        if !inner.streams.is_empty() {
            self.metrics.record(Sample::UnexpectedOpenStreams(location));
        }
        if !inner.going_away {
            self.metrics.record(Sample::UnexpectedNotGoingAway(location));
        }
    }

    /// Schedules the owner's closed notification for a later turn of the event loop
    fn notify_owner_closed_later(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.close_notification != CloseNotification::NotSent {
                return;
            }
            self.record_close_notification_state(&inner, Location::NotifyFactoryOfSessionClosedLater);
            inner.going_away = true;
            inner.close_notification = CloseNotification::Scheduled;
        }
        let weak = self.weak();
        self.task_runner.post_task(Box::new(move || {
            if let Some(session) = weak.upgrade() {
                session.notify_owner_closed();
            }
        }));
    }

    fn notify_owner_closed(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.close_notification == CloseNotification::Sent {
                return;
            }
            self.record_close_notification_state(&inner, Location::NotifyFactoryOfSessionClosed);
            inner.going_away = true;
            inner.close_notification = CloseNotification::Sent;
        }
        debug!("session closed");
        if let Some(owner) = self.owner() {
            owner.on_session_closed(self);
        }
    }

    /// The connection has closed. Tears the session down.
    ///
    /// The owner is told the session is going away straight away, and that it
    /// has closed on a later turn of the event loop. Only the first call has any effect.
    pub fn on_connection_closed(&self, error: QuicErrorCode, from_peer: bool) {
        let _span = self.span.enter();
        let (open_streams, total_streams, confirmed, version, connected) = {
            let mut inner = self.inner.borrow_mut();
            if std::mem::replace(&mut inner.connection_closed, true) {
                trace!("connection close already handled");
                return;
            }
            (
                inner.streams.len(),
                inner.num_total_streams,
                inner.crypto_stream.handshake_confirmed(),
                inner.connection.version(),
                inner.connection.connected(),
            )
        };
        if connected {
            warn!("connection reported closed while still connected");
        }
        self.logger.on_connection_closed(error, from_peer);
        self.metrics
            .record(Sample::ConnectionCloseErrorCode { from_peer, error });
        if error == QuicErrorCode::ConnectionTimedOut {
            self.metrics.record(Sample::TimedOutOpenStreams(open_streams));
            if !confirmed {
                self.metrics
                    .record(Sample::HandshakeTimedOutTotalStreams(total_streams));
            }
        }
        self.metrics.record(Sample::QuicVersion(version));

        self.notify_owner_going_away();
        let callback = self.inner.borrow_mut().connect_callback.take();
        if let Some(callback) = callback {
            callback(Err(NetError::QuicProtocolError));
        }
        self.fail_stream_requests(NetError::Aborted);
        self.inner.borrow_mut().socket.close();
        self.close_all_streams(NetError::Unexpected);
        self.close_all_observers(NetError::Unexpected);
        self.notify_owner_closed_later();
    }

    /// Closes the session because of a local error.
    ///
    /// Unlike a close reported by the connection, the owner is told the session
    /// has closed before this returns.
    pub fn close_session_on_error(&self, error: NetError) {
        let _span = self.span.enter();
        self.metrics.record(Sample::CloseSessionOnError(error));
        self.close_session_on_error_inner(error, QuicErrorCode::InternalError);
        self.notify_owner_closed();
    }

    fn close_session_on_error_inner(&self, net_error: NetError, quic_error: QuicErrorCode) {
        let callback = self.inner.borrow_mut().connect_callback.take();
        if let Some(callback) = callback {
            callback(Err(net_error));
        }
        self.fail_stream_requests(NetError::Aborted);
        self.close_all_streams(net_error);
        self.close_all_observers(net_error);
        debug!("closing session: {net_error}");
        let connected = {
            let mut inner = self.inner.borrow_mut();
            inner.connection.close_connection(quic_error, false);
            inner.connection.connected()
        };
        if connected {
            warn!("connection still connected after being closed");
        }
        self.on_connection_closed(quic_error, false);
    }

    // READ LOOP ////////////////////////////////////////////////////////////////////

    /// Reads the next datagram, unless a read is already in flight.
    ///
    /// Reads that complete immediately are processed inline, up to the configured
    /// limit; the one after that is deferred to the event loop.
    pub fn start_reading(&self) {
        let weak = self.weak();
        let result = {
            let mut inner = self.inner.borrow_mut();
            if inner.read_pending || inner.connection_closed {
                return;
            }
            inner.read_pending = true;
            inner.socket.read(
                self.config.max_packet_size,
                Box::new(move |result: std::io::Result<Bytes>| {
                    if let Some(session) = weak.upgrade() {
                        session.on_read_complete(result);
                    }
                }),
            )
        };
        let ReadResult::Ready(result) = result else {
            self.inner.borrow_mut().num_packets_read = 0;
            return;
        };
        let yield_now = {
            let mut inner = self.inner.borrow_mut();
            inner.num_packets_read += 1;
            if inner.num_packets_read > self.config.max_sync_reads {
                inner.num_packets_read = 0;
                true
            } else {
                false
            }
        };
        if yield_now {
            trace!("yielding to the event loop after {} reads", self.config.max_sync_reads);
            let weak = self.weak();
            self.task_runner.post_task(Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.on_read_complete(result);
                }
            }));
        } else {
            self.on_read_complete(result);
        }
    }

    /// Handles a completed read: feeds the datagram to the connection and reads again
    pub fn on_read_complete(&self, result: std::io::Result<Bytes>) {
        let _span = self.span.enter();
        self.inner.borrow_mut().read_pending = false;
        let packet = match result {
            Ok(packet) if packet.is_empty() => Err(NetError::ConnectionClosed),
            Ok(packet) => Ok(packet),
            Err(e) => Err(NetError::from(e)),
        };
        let addresses = packet.and_then(|packet| {
            let inner = self.inner.borrow();
            let local = inner.socket.local_address()?;
            let peer = inner.socket.peer_address()?;
            Ok((packet, local, peer))
        });
        let (packet, local, peer) = match addresses {
            Ok(a) => a,
            Err(e) => {
                self.on_read_error(e);
                return;
            }
        };

        self.logger.on_packet_received(local, peer, packet.len());
        let events = self
            .inner
            .borrow_mut()
            .connection
            .process_udp_packet(local, peer, &packet);
        self.dispatch_connection_events(events);

        let connected = self.inner.borrow().connection.connected();
        if !connected {
            self.notify_owner_closed_later();
            return;
        }
        self.start_reading();
    }

    fn on_read_error(&self, error: NetError) {
        debug!("socket read failed: {error}");
        self.metrics.record(Sample::ReadError(error));
        self.notify_owner_going_away();
        self.close_session_on_error_inner(error, QuicErrorCode::PacketReadError);
        self.notify_owner_closed_later();
    }

    fn dispatch_connection_events(&self, events: Vec<ConnectionEvent>) {
        for event in events {
            let closed = self.inner.borrow().connection_closed;
            if closed {
                trace!("connection closed; dropping {event:?}");
                break;
            }
            match event {
                ConnectionEvent::CryptoHandshake(e) => self.on_crypto_handshake_event(e),
                ConnectionEvent::StreamFrames(frames) => self.on_stream_frames(&frames),
                ConnectionEvent::RstStream { stream_id, error } => {
                    self.on_rst_stream(stream_id, error);
                }
                ConnectionEvent::GoAway {
                    last_good_stream_id,
                } => self.on_go_away(last_good_stream_id),
                ConnectionEvent::VersionNegotiated(v) => self.on_successful_version_negotiation(v),
                ConnectionEvent::ConnectionClosed { error, from_peer } => {
                    self.on_connection_closed(error, from_peer);
                }
            }
        }
    }

    // ACCESSORS ////////////////////////////////////////////////////////////////////

    /// Diagnostic snapshot, given the aliases the owner knows this session by
    #[must_use]
    pub fn info(&self, aliases: &BTreeSet<HostPortPair>) -> SessionInfo {
        let inner = self.inner.borrow();
        let primary = aliases
            .iter()
            .next()
            .unwrap_or(&self.server_key.host_port_pair);
        SessionInfo {
            host_port_pair: primary.to_string(),
            version: inner.connection.version().to_string(),
            open_streams: inner.streams.len(),
            total_streams: inner.num_total_streams,
            peer_address: inner
                .connection
                .peer_address()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            connection_id: inner.connection.connection_id().to_string(),
            connected: inner.connection.connected(),
            secure: inner
                .cert_verify_result
                .as_ref()
                .is_some_and(|r| r.verified_cert.is_some()),
            aliases: aliases.iter().map(ToString::to_string).collect(),
        }
    }

    /// Which server this session talks to
    #[must_use]
    pub fn server_key(&self) -> &ServerKey {
        &self.server_key
    }

    /// Accessor
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Currently open streams
    #[must_use]
    pub fn num_open_streams(&self) -> usize {
        self.inner.borrow().streams.len()
    }

    /// Streams created over the session's lifetime
    #[must_use]
    pub fn num_total_streams(&self) -> u64 {
        self.inner.borrow().num_total_streams
    }

    /// Stream requests waiting for a free slot
    #[must_use]
    pub fn num_queued_requests(&self) -> usize {
        self.inner.borrow().stream_requests.len()
    }

    /// Registered observers
    #[must_use]
    pub fn num_observers(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Whether the session will accept no new streams
    #[must_use]
    pub fn is_going_away(&self) -> bool {
        self.inner.borrow().going_away
    }

    /// Whether the peer has sent GOAWAY
    #[must_use]
    pub fn goaway_received(&self) -> bool {
        self.inner.borrow().goaway_received
    }

    /// Whether encryption has been established
    #[must_use]
    pub fn is_encryption_established(&self) -> bool {
        self.inner.borrow().crypto_stream.encryption_established()
    }

    /// Whether the handshake has been confirmed
    #[must_use]
    pub fn is_crypto_handshake_confirmed(&self) -> bool {
        self.inner.borrow().crypto_stream.handshake_confirmed()
    }

    /// Client hellos sent so far
    #[must_use]
    pub fn num_sent_client_hellos(&self) -> u32 {
        self.inner.borrow().crypto_stream.num_sent_client_hellos()
    }

    /// Whether the connection is still usable
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connection.connected()
    }

    /// Connection id
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.borrow().connection.connection_id()
    }

    /// Last known peer address
    #[must_use]
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.inner.borrow().connection.peer_address()
    }

    /// Packet and handshake message counts
    #[must_use]
    pub fn connection_stats(&self) -> LoggerStats {
        self.logger.stats()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        let _span = self.span.enter();
        debug!("dropping session");
        let inner = self.inner.get_mut();
        if !inner.streams.is_empty() {
            self.metrics
                .record(Sample::UnexpectedOpenStreams(Location::Destructor));
        }
        if inner.observers.iter().any(|o| o.strong_count() > 0) {
            self.metrics
                .record(Sample::UnexpectedObservers(Location::Destructor));
        }
        if !inner.going_away {
            self.metrics
                .record(Sample::UnexpectedNotGoingAway(Location::Destructor));
        }

        for (_, stream) in std::mem::take(&mut inner.streams) {
            stream.on_error(NetError::Unexpected);
        }
        for weak in std::mem::take(&mut inner.observers) {
            if let Some(observer) = weak.upgrade() {
                observer.on_session_closed(NetError::Unexpected);
            }
        }
        for slot in std::mem::take(&mut inner.stream_requests) {
            let _ = slot.complete(Err(NetError::Aborted));
        }
        inner.connection.set_debug_visitor(None);

        let encrypted = inner.crypto_stream.encryption_established();
        let confirmed = inner.crypto_stream.handshake_confirmed();
        let hellos = inner.crypto_stream.num_sent_client_hellos();
        if encrypted {
            self.metrics
                .record(Sample::HandshakeState(HandshakeState::EncryptionEstablished));
        }
        self.metrics.record(Sample::HandshakeState(if confirmed {
            HandshakeState::HandshakeConfirmed
        } else {
            HandshakeState::Failed
        }));
        self.metrics
            .record(Sample::NumTotalStreams(inner.num_total_streams));
        self.metrics.record(Sample::NumSentClientHellos(hellos));

        if !confirmed {
            return;
        }
        let Some(round_trips) = hellos.checked_sub(1) else {
            return;
        };
        let secure = inner
            .cert_verify_result
            .as_ref()
            .is_some_and(|r| r.verified_cert.is_some());
        self.metrics.record(Sample::ConnectRoundTrips {
            secure,
            port_selected: self.config.port_selection,
            round_trips,
        });
    }
}
