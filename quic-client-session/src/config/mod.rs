// (c) 2025 Ross Younger
//! # Configuration management
//!
//! A session obtains its tunables from the following sources, in order:
//! 1. Any [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html)
//!    merged in by the application (see [`Manager::merge_provider`])
//! 2. Environment variables prefixed with `QUIC_SESSION_`, e.g. `QUIC_SESSION_MAX_OPEN_STREAMS=8`
//! 3. Hard-wired defaults
//!
//! Each option may appear in multiple places; the highest priority source wins.
//!
//! The set of supported fields is the [`SessionConfig`] structure.

mod manager;
pub use manager::{ENV_PREFIX, Manager};

mod structure;
pub use structure::{DEFAULT_MAX_PACKET_SIZE, SessionConfig};

mod sysdefault;
