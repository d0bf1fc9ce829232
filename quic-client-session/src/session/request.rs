//! Requests for outgoing streams
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::{ClientSession, ClientStream};
use crate::error::NetError;
use crate::types::Outcome;

/// Completion callback for a queued [`StreamRequest`]
pub type StreamCallback = Box<dyn FnOnce(Result<ClientStream, NetError>)>;

/// The part of a request the session's queue refers to.
///
/// The caller owns the [`StreamRequest`]; the queue only shares this slot.
#[derive(Default)]
pub(crate) struct RequestSlot {
    session: RefCell<Weak<ClientSession>>,
    callback: RefCell<Option<StreamCallback>>,
}

impl Debug for RequestSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSlot")
            .field("pending", &self.callback.borrow().is_some())
            .finish_non_exhaustive()
    }
}

impl RequestSlot {
    /// Delivers the result of the request.
    ///
    /// Returns the stream if nobody is waiting for it any more, so the caller can close it.
    pub(crate) fn complete(&self, result: Result<ClientStream, NetError>) -> Option<ClientStream> {
        *self.session.borrow_mut() = Weak::new();
        let callback = self.callback.borrow_mut().take();
        match (callback, result) {
            (Some(callback), result) => {
                callback(result);
                None
            }
            (None, Ok(stream)) => Some(stream),
            (None, Err(_)) => None,
        }
    }
}

/// A caller's request for an outgoing stream.
///
/// If a stream slot is free the stream is returned immediately. Otherwise the
/// request joins the session's queue and the callback fires later, exactly once:
/// with a stream when one becomes available, or with an error if the session
/// goes away first. Requests are served strictly in the order they were queued.
///
/// Dropping the request cancels it.
#[derive(Debug, Default)]
pub struct StreamRequest {
    slot: Rc<RequestSlot>,
}

impl StreamRequest {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks `session` for a stream.
    ///
    /// * `Ok(Outcome::Done(stream))`: a stream was created; `callback` is dropped unrun.
    /// * `Ok(Outcome::Pending)`: the request is queued; `callback` will be called.
    /// * `Err(_)`: the session cannot create streams; `callback` is dropped unrun.
    ///
    /// Any request previously started on this object is cancelled first.
    pub fn start<F>(
        &mut self,
        session: &Rc<ClientSession>,
        callback: F,
    ) -> Result<Outcome<ClientStream>, NetError>
    where
        F: FnOnce(Result<ClientStream, NetError>) + 'static,
    {
        self.cancel();
        *self.slot.session.borrow_mut() = Rc::downgrade(session);
        *self.slot.callback.borrow_mut() = Some(Box::new(callback));
        let result = session.try_create_stream(&self.slot);
        if !matches!(result, Ok(Outcome::Pending)) {
            *self.slot.session.borrow_mut() = Weak::new();
            let _ = self.slot.callback.borrow_mut().take();
        }
        result
    }

    /// Withdraws the request from the session's queue, if it is still there.
    /// Does nothing if the request has already completed.
    pub fn cancel(&mut self) {
        let session = std::mem::take(&mut *self.slot.session.borrow_mut());
        if let Some(session) = session.upgrade() {
            session.cancel_request(&self.slot);
        }
        let _ = self.slot.callback.borrow_mut().take();
    }

    /// Whether the request is queued and waiting
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.callback.borrow().is_some()
    }

    /// Requests a stream and waits for it.
    ///
    /// Dropping the returned future before it completes withdraws the request.
    pub async fn request(session: &Rc<ClientSession>) -> Result<ClientStream, NetError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut request = StreamRequest::new();
        let outcome = request.start(session, move |result| {
            let _ = tx.send(result);
        })?;
        match outcome {
            Outcome::Done(stream) => Ok(stream),
            Outcome::Pending => rx.await.unwrap_or(Err(NetError::Aborted)),
        }
    }
}

impl Drop for StreamRequest {
    fn drop(&mut self) {
        self.cancel();
    }
}
