//! Outgoing data streams
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::error::NetError;
use crate::transport::StreamFrame;
use crate::types::StreamId;

#[derive(Debug, Default)]
struct StreamState {
    closed: bool,
    error: Option<NetError>,
    received: BytesMut,
    fin_received: bool,
}

/// A handle to an outgoing data stream created by a [`ClientSession`](super::ClientSession).
///
/// Clones refer to the same stream. The session keeps its own handle while the
/// stream is open; closing it (by either side) is reflected in every clone.
#[derive(Clone, Debug)]
pub struct ClientStream {
    id: StreamId,
    state: Rc<RefCell<StreamState>>,
}

impl ClientStream {
    pub(crate) fn new(id: StreamId) -> Self {
        Self {
            id,
            state: Rc::default(),
        }
    }

    /// Stream id
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Whether the stream has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// The error the stream was closed with, if it did not close cleanly
    #[must_use]
    pub fn error(&self) -> Option<NetError> {
        self.state.borrow().error
    }

    /// Whether the peer has finished sending
    #[must_use]
    pub fn fin_received(&self) -> bool {
        self.state.borrow().fin_received
    }

    /// Takes all data received so far
    #[must_use]
    pub fn take_received(&self) -> Bytes {
        self.state.borrow_mut().received.split().freeze()
    }

    /// Whether `other` refers to the same stream
    #[must_use]
    pub fn same_stream(&self, other: &ClientStream) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Appends a frame's payload. Frames are delivered in order by the connection.
    pub(crate) fn on_frame(&self, frame: &StreamFrame) {
        let mut state = self.state.borrow_mut();
        state.received.extend_from_slice(&frame.data);
        state.fin_received |= frame.fin;
    }

    pub(crate) fn on_closed(&self) {
        self.state.borrow_mut().closed = true;
    }

    pub(crate) fn on_error(&self, error: NetError) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        let _ = state.error.get_or_insert(error);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::ClientStream;
    use crate::error::NetError;
    use crate::transport::StreamFrame;

    #[test]
    fn frames_accumulate() {
        let s = ClientStream::new(5);
        let clone = s.clone();
        s.on_frame(&StreamFrame {
            stream_id: 5,
            fin: false,
            offset: 0,
            data: Bytes::from_static(b"hello "),
        });
        s.on_frame(&StreamFrame {
            stream_id: 5,
            fin: true,
            offset: 6,
            data: Bytes::from_static(b"world"),
        });
        assert!(clone.fin_received());
        assert_eq!(&clone.take_received()[..], b"hello world");
        assert!(s.take_received().is_empty());
        assert!(s.same_stream(&clone));
    }

    #[test]
    fn first_error_sticks() {
        let s = ClientStream::new(7);
        assert!(!s.is_closed());
        s.on_error(NetError::Unexpected);
        s.on_error(NetError::Aborted);
        assert!(s.is_closed());
        assert_eq!(s.error(), Some(NetError::Unexpected));
    }

    #[test]
    fn clean_close_has_no_error() {
        let s = ClientStream::new(9);
        s.on_closed();
        assert!(s.is_closed());
        assert_eq!(s.error(), None);
        assert!(!ClientStream::new(9).same_stream(&s));
    }
}
