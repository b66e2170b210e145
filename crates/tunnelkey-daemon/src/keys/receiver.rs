//! The capability surface through which the manager reads and commits key state.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use tunnelkey_crypto::PrivateKey;

/// Snapshot of the credential store as seen by one rotation decision.
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    /// Account session token, passed through to the issuance endpoint.
    pub session: String,
    /// Active public key; empty when no key is provisioned.
    pub public_key: String,
    pub private_key: PrivateKey,
    pub local_address: Option<IpAddr>,
    /// When the active key was generated.
    pub generated_at: Option<SystemTime>,
    /// Rotation interval; zero means undefined.
    pub interval: Duration,
}

impl KeyState {
    pub fn has_active_key(&self) -> bool {
        !self.public_key.is_empty()
    }
}

/// Credential store collaborator bound with
/// [`KeysManager::initialize`](super::KeysManager::initialize).
///
/// `persist_new_key_state` is the only mutation the manager performs; the
/// implementor is responsible for notifying anyone else interested.
pub trait KeyStateReceiver: Send + Sync {
    fn current_key_state(&self) -> KeyState;

    fn persist_new_key_state(
        &self,
        public_key: &str,
        private_key: &PrivateKey,
        local_address: IpAddr,
    ) -> tunnelkey_core::Result<()>;

    fn is_tunnel_connected(&self) -> bool;
}
