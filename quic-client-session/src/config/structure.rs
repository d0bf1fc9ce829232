//! Configuration structure
// (c) 2025 Ross Younger

use std::sync::LazyLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use struct_field_names_as_array::FieldNamesAsSlice;

/// Largest datagram the session expects to read
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1350;

/// The tunable parameters of a client session.
///
/// There is no `default()`; use [`SessionConfig::system_default()`], or a
/// [`Manager`](super::Manager) to layer in user settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, FieldNamesAsSlice)]
pub struct SessionConfig {
    /// Maximum number of concurrently open outgoing streams.
    /// Further stream requests queue until a stream closes.
    /// [default: 100]
    pub max_open_streams: usize,

    /// Size of the read buffer, in bytes. Datagrams larger than this are truncated.
    /// [default: 1350]
    pub max_packet_size: usize,

    /// How many consecutive reads that complete immediately are processed inline
    /// before yielding to the event loop.
    /// [default: 32]
    pub max_sync_reads: u32,

    /// Whether the local UDP port was chosen by the session factory rather than the OS.
    /// This only affects the metrics recorded when the session ends.
    /// [default: false]
    pub port_selection: bool,
}

static SYSTEM_DEFAULT_CONFIG: LazyLock<SessionConfig> = LazyLock::new(|| SessionConfig {
    max_open_streams: 100,
    max_packet_size: DEFAULT_MAX_PACKET_SIZE,
    max_sync_reads: 32,
    port_selection: false,
});

impl SessionConfig {
    /// Hard-wired defaults
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// Checks the values are usable, returning the configuration if so
    pub fn validate(self) -> Result<Self> {
        if self.max_open_streams == 0 {
            anyhow::bail!("max_open_streams must be at least 1");
        }
        if self.max_packet_size == 0 {
            anyhow::bail!("max_packet_size must be at least 1");
        }
        if self.max_sync_reads == 0 {
            anyhow::bail!("max_sync_reads must be at least 1");
        }
        Ok(self)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::SessionConfig;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let c = *SessionConfig::system_default();
        assert_eq!(c.validate().unwrap(), c);
        assert_eq!(c.max_sync_reads, 32);
    }

    #[rstest]
    #[case(SessionConfig { max_open_streams: 0, ..*SessionConfig::system_default() })]
    #[case(SessionConfig { max_packet_size: 0, ..*SessionConfig::system_default() })]
    #[case(SessionConfig { max_sync_reads: 0, ..*SessionConfig::system_default() })]
    fn zero_limits_rejected(#[case] config: SessionConfig) {
        assert!(config.validate().is_err());
    }
}
