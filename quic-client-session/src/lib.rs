// (c) 2025 Ross Younger

#![allow(clippy::doc_markdown)]
//! The client-side session layer of a QUIC stack.
//!
//! A [`ClientSession`] owns one QUIC connection to one server and manages
//! everything above the packet level:
//!
//! - 🤝 It starts the crypto handshake and tells the caller when the session
//!   is usable, either once encryption is established or once the handshake is confirmed.
//! - 🚦 It hands out outgoing streams up to a configured limit. Further
//!   [`StreamRequest`]s wait in a strictly first-in, first-out queue and are
//!   served as streams close.
//! - 📥 It reads datagrams from the socket and feeds them to the connection,
//!   yielding to the event loop now and then so a busy socket cannot starve other work.
//! - 🧹 When the connection closes, for whatever reason, it fails everything
//!   pending, closes every stream and observer exactly once, and tells its
//!   owner the session is going away and then that it has closed.
//!
//! The owner of a session is typically a [`SessionPool`], which uses those
//! notifications to route new requests only to healthy sessions, and which can
//! share one secure session between several host names when the server
//! certificate allows.
//!
//! ## 🧵 Threading model
//!
//! Everything here is single threaded. Sessions are shared as `Rc<ClientSession>`
//! and driven by one event loop; with tokio, that means a
//! [`LocalSet`](tokio::task::LocalSet). Deferred work goes through a
//! [`TaskRunner`](util::TaskRunner).
//!
//! ## 🔌 Collaborators
//!
//! The session does not parse packets or run the handshake itself. It drives a
//! [`Connection`](transport::Connection), a
//! [`DatagramSocket`](transport::DatagramSocket) and a
//! [`CryptoClientStream`](transport::CryptoClientStream), all traits, so that any
//! QUIC implementation (or a test fake) can sit underneath.
//! [`UdpTransport`](transport::UdpTransport) is a ready-made tokio socket.
//!
//! ## 📊 Observability
//!
//! Lifecycle events are logged via `tracing`, within a span per session; see
//! [`util::setup_tracing`]. Measurements go to a [`MetricsSink`](metrics::MetricsSink).
//!
//! ## ⚙️ Configuration
//!
//! See [`config`].
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod cert;
pub mod config;
pub use config::SessionConfig;
pub mod error;
pub use error::{NetError, QuicErrorCode, RstStreamErrorCode};
pub mod logger;
pub mod metrics;
mod pool;
pub use pool::SessionPool;
pub mod server_info;
pub mod session;
pub use session::{ClientSession, ClientStream, SessionInfo, StreamRequest};
pub mod transport;
pub mod types;
pub mod util;

/// Fakes for a session's collaborators.
///
/// **This module should be regarded as unstable and subject to modification without notice**.
#[cfg(any(test, feature = "unstable-test-helpers"))]
pub mod testing;
