//! Key rotation error types.

use crate::issuance::IssuanceError;

/// Errors returned by [`KeysManager`](super::KeysManager) entry points.
#[derive(Debug, thiserror::Error)]
pub enum KeysError {
    #[error("Keys manager is not initialized")]
    NotInitialized,

    #[error("Keys manager is already initialized")]
    AlreadyInitialized,

    #[error("Keys manager requires a key state receiver")]
    InvalidReceiver,

    #[error("Key rotation interval is not defined")]
    IntervalUndefined,

    #[error("Key generation failed: {0}")]
    KeyGenFailed(#[source] tunnelkey_crypto::CryptoError),

    #[error("Key issuance failed: {0}")]
    IssuanceFailed(#[source] IssuanceError),

    #[error("Failed to persist new keys: {0}")]
    PersistFailed(#[source] tunnelkey_core::Error),
}
