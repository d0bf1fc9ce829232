//! Built-in session settings, as a configuration source
// (c) 2025 Ross Younger

use figment::{
    Metadata, Profile, Provider,
    providers::Serialized,
    value::{Dict, Map},
};

use super::SessionConfig;

/// Supplies [`SessionConfig::system_default`] to a [`figment::Figment`]
#[derive(Clone, Copy, Debug)]
pub(super) struct SystemDefault;

impl Provider for SystemDefault {
    fn metadata(&self) -> Metadata {
        Metadata::named("built-in default")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(SessionConfig::system_default()).data()
    }
}
