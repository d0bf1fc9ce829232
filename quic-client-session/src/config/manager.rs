//! Configuration source wrangling
// (c) 2025 Ross Younger

use anyhow::Result;
use figment::{Figment, Provider, providers::Env};
use serde::Deserialize;
use struct_field_names_as_array::FieldNamesAsSlice as _;
use tracing::debug;

use super::{SessionConfig, sysdefault::SystemDefault};

/// Prefix of the environment variables we read, e.g. `QUIC_SESSION_MAX_OPEN_STREAMS`
pub const ENV_PREFIX: &str = "QUIC_SESSION_";

/// Processes and merges configuration sources.
///
/// Sources merged later take priority; system defaults always come last.
#[derive(Debug)]
pub struct Manager {
    data: Figment,
}

impl Manager {
    fn new(apply_env: bool) -> Self {
        let mut new1 = Self {
            data: Figment::new(),
        };
        if apply_env {
            new1.merge_provider(Env::prefixed(ENV_PREFIX).only(SessionConfig::FIELD_NAMES_AS_SLICE));
        }
        new1
    }

    /// General constructor for production use: reads the environment
    #[must_use]
    pub fn standard() -> Self {
        Self::new(true)
    }

    /// Constructor that ignores the environment
    #[must_use]
    pub fn without_env() -> Self {
        Self::new(false)
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(SystemDefault);
    }

    /// Attempts to extract a particular struct from the data.
    pub fn get<'de, T>(&self) -> Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract_lossy::<T>()
    }

    /// Extracts and validates the session configuration, applying system defaults first
    pub fn session_config(mut self) -> Result<SessionConfig> {
        self.apply_system_default();
        let config = self.get::<SessionConfig>()?.validate()?;
        debug!("session configuration: {config:?}");
        Ok(config)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use figment::providers::Serialized;
    use pretty_assertions::assert_eq;

    use super::Manager;
    use crate::config::SessionConfig;

    #[test]
    fn defaults() {
        let config = Manager::without_env().session_config().unwrap();
        assert_eq!(config, *SessionConfig::system_default());
    }

    #[test]
    fn provider_overrides_default() {
        let mut mgr = Manager::without_env();
        mgr.merge_provider(Serialized::default("max_open_streams", 2));
        let config = mgr.session_config().unwrap();
        assert_eq!(config.max_open_streams, 2);
        assert_eq!(config.max_sync_reads, 32);
    }

    #[test]
    fn invalid_value_fails_validation() {
        let mut mgr = Manager::without_env();
        mgr.merge_provider(Serialized::default("max_sync_reads", 0));
        assert!(mgr.session_config().is_err());
    }

    #[test]
    fn type_error() {
        let mut mgr = Manager::without_env();
        mgr.merge_provider(Serialized::default("max_open_streams", "lots"));
        let err = mgr.session_config().unwrap_err();
        println!("Error: {err}");
    }

    #[test]
    fn environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("QUIC_SESSION_MAX_OPEN_STREAMS", "7");
            jail.set_env("QUIC_SESSION_PORT_SELECTION", "true");
            jail.set_env("QUIC_SESSION_UNRELATED", "whatever");
            let config = Manager::standard().session_config().unwrap();
            assert_eq!(config.max_open_streams, 7);
            assert!(config.port_selection);
            Ok(())
        });
    }
}
