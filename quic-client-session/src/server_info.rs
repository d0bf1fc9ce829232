//! Persisted per-server crypto state, which allows 0-RTT reconnection
// (c) 2025 Ross Younger

use bytes::Bytes;

/// Crypto state the client has cached about a server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CachedState {
    /// Serialized server config
    pub server_config: Bytes,
    /// Source address token issued by the server
    pub source_address_token: Bytes,
    /// Signature over the server config
    pub server_config_sig: Bytes,
    /// Server certificate chain
    pub certs: Vec<Bytes>,
    /// Whether the proof in this state has been verified
    pub proof_valid: bool,
}

/// The part of [`CachedState`] that is persisted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfoState {
    /// Serialized server config
    pub server_config: Bytes,
    /// Source address token issued by the server
    pub source_address_token: Bytes,
    /// Signature over the server config
    pub server_config_sig: Bytes,
    /// Server certificate chain
    pub certs: Vec<Bytes>,
}

impl From<&CachedState> for ServerInfoState {
    fn from(cached: &CachedState) -> Self {
        Self {
            server_config: cached.server_config.clone(),
            source_address_token: cached.source_address_token.clone(),
            server_config_sig: cached.server_config_sig.clone(),
            certs: cached.certs.clone(),
        }
    }
}

/// Somewhere to keep [`ServerInfoState`] between sessions
pub trait ServerInfo {
    /// Whether the store has finished loading and can accept writes
    fn is_ready_to_persist(&self) -> bool;
    /// Stores `state`
    fn persist(&mut self, state: ServerInfoState);
}

/// An in-memory [`ServerInfo`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryServerInfo {
    /// The last persisted state
    pub state: Option<ServerInfoState>,
    /// Number of times `persist` was called
    pub persist_count: usize,
}

impl ServerInfo for MemoryServerInfo {
    fn is_ready_to_persist(&self) -> bool {
        true
    }

    fn persist(&mut self, state: ServerInfoState) {
        self.state = Some(state);
        self.persist_count += 1;
    }
}
