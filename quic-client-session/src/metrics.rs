//! Session metrics.
//!
//! The session reports everything worth counting as a [`Sample`] to the
//! [`MetricsSink`] it was constructed with. Nothing here is global; tests attach a
//! [`RecordingMetrics`] and assert on what was recorded.
//!
//! The `Unexpected*` samples mark states that should never occur. They indicate an
//! earlier bug rather than a fault in the session itself; a healthy run records none.
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::error::{NetError, QuicErrorCode};
use crate::types::{HandshakeState, QuicVersion};

/// Where an unexpected condition was noticed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Location {
    /// Dropping the session
    Destructor,
    /// Registering an observer
    AddObserver,
    /// Requesting a stream
    TryCreateStream,
    /// Creating a stream without queueing
    CreateOutgoingReliableStream,
    /// Scheduling the deferred closed notification
    NotifyFactoryOfSessionClosedLater,
    /// Sending the closed notification
    NotifyFactoryOfSessionClosed,
}

/// One recorded measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sample {
    /// Handshake progress
    HandshakeState(HandshakeState),
    /// Streams were open when they should not have been
    UnexpectedOpenStreams(Location),
    /// Observers were registered when they should not have been
    UnexpectedObservers(Location),
    /// The session should have been going away, but was not
    UnexpectedNotGoingAway(Location),
    /// Open streams right after creating one
    NumOpenStreams(usize),
    /// Streams created over the session's lifetime, recorded on drop
    NumTotalStreams(u64),
    /// Client hellos sent, recorded on drop
    NumSentClientHellos(u32),
    /// Close code of a connection
    ConnectionCloseErrorCode {
        /// Whether the peer closed the connection
        from_peer: bool,
        /// Why
        error: QuicErrorCode,
    },
    /// Open streams when the connection timed out
    TimedOutOpenStreams(usize),
    /// Streams ever created when the connection timed out before handshake confirmation
    HandshakeTimedOutTotalStreams(u64),
    /// Version in use when the connection closed
    QuicVersion(QuicVersion),
    /// A socket read failed
    ReadError(NetError),
    /// The session was closed locally
    CloseSessionOnError(NetError),
    /// Stream frames carried by a single packet
    StreamFramesInPacket(usize),
    /// Frames for a single stream within one packet
    StreamFramesPerStream(usize),
    /// Handshake round trips, for a confirmed session
    ConnectRoundTrips {
        /// Whether the session had a certificate
        secure: bool,
        /// Whether the local port was chosen by the factory
        port_selected: bool,
        /// Client hellos sent minus one
        round_trips: u32,
    },
}

impl Sample {
    /// Whether this sample marks a state that should never occur
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            Sample::UnexpectedOpenStreams(_)
                | Sample::UnexpectedObservers(_)
                | Sample::UnexpectedNotGoingAway(_)
        )
    }
}

/// Somewhere to put [`Sample`]s
pub trait MetricsSink {
    /// Records one sample
    fn record(&self, sample: Sample);
}

/// A sink that logs samples via `tracing`.
///
/// Unexpected-condition samples are logged as warnings, everything else at trace level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, sample: Sample) {
        if sample.is_unexpected() {
            warn!("unexpected session state: {sample:?}");
        } else {
            trace!("metric: {sample:?}");
        }
    }
}

/// A sink that keeps everything it is given. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct RecordingMetrics {
    samples: Rc<RefCell<Vec<Sample>>>,
}

impl RecordingMetrics {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in order
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.borrow().clone()
    }

    /// How many recorded samples satisfy `pred`
    pub fn count(&self, pred: impl Fn(&Sample) -> bool) -> usize {
        self.samples.borrow().iter().filter(|s| pred(s)).count()
    }

    /// Whether `sample` was recorded at least once
    #[must_use]
    pub fn contains(&self, sample: Sample) -> bool {
        self.samples.borrow().contains(&sample)
    }

    /// All unexpected-condition samples recorded so far
    #[must_use]
    pub fn unexpected(&self) -> Vec<Sample> {
        self.samples
            .borrow()
            .iter()
            .filter(|s| s.is_unexpected())
            .copied()
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, sample: Sample) {
        self.samples.borrow_mut().push(sample);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{Location, MetricsSink as _, RecordingMetrics, Sample, TracingMetrics};
    use crate::types::HandshakeState;
    use pretty_assertions::assert_eq;

    #[test]
    fn recording_sink_shares_storage() {
        let m = RecordingMetrics::new();
        let m2 = m.clone();
        m2.record(Sample::HandshakeState(HandshakeState::Started));
        m2.record(Sample::UnexpectedObservers(Location::AddObserver));
        assert_eq!(m.samples().len(), 2);
        assert!(m.contains(Sample::HandshakeState(HandshakeState::Started)));
        assert_eq!(
            m.unexpected(),
            vec![Sample::UnexpectedObservers(Location::AddObserver)]
        );
        assert_eq!(m.count(|s| matches!(s, Sample::HandshakeState(_))), 1);
    }

    #[test]
    fn tracing_sink_accepts_anything() {
        TracingMetrics.record(Sample::NumOpenStreams(3));
        TracingMetrics.record(Sample::UnexpectedNotGoingAway(Location::Destructor));
    }
}
