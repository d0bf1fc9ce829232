//! Interfaces for parties interested in a session's lifecycle
// (c) 2025 Ross Younger

use super::ClientSession;
use crate::error::NetError;

/// Learns about session-level lifecycle events.
///
/// The session holds observers weakly; an observer that is dropped without
/// being removed is simply skipped.
#[cfg_attr(test, mockall::automock)]
pub trait SessionObserver {
    /// The crypto handshake has been confirmed
    fn on_crypto_handshake_confirmed(&self);
    /// The session has closed. The observer has already been removed.
    fn on_session_closed(&self, error: NetError);
}

/// The session factory that owns a session.
///
/// The owner uses these notifications to keep its pool of sessions current.
/// None of them is delivered while the session is borrowed, so the owner may
/// call back into the session, or drop its reference to it.
#[cfg_attr(test, mockall::automock)]
pub trait SessionOwner {
    /// The session will accept no new streams. Delivered once per session.
    fn on_session_going_away(&self, session: &ClientSession);
    /// The session has no open streams.
    ///
    /// Only sent when a stream closes in normal operation. Streams closed while
    /// the session is torn down do not trigger it.
    fn on_idle_session(&self, session: &ClientSession);
    /// The session has closed and may be dropped. Delivered once per session.
    ///
    /// Depending on how the session closed, this arrives either from within the
    /// call that closed it or on a later turn of the event loop.
    fn on_session_closed(&self, session: &ClientSession);
}
