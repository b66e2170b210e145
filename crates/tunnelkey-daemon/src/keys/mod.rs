//! WireGuard key rotation.
//!
//! [`KeysManager`] owns the lifecycle of the tunnel keypair: it provisions the
//! first key on demand, re-provisions it against the issuance endpoint once
//! the configured interval elapses, and never lets two rotations overlap.

pub mod error;
pub mod generator;
pub mod manager;
pub mod receiver;
pub mod schedule;

pub use error::KeysError;
pub use generator::{KeyGenerator, X25519KeyGenerator};
pub use manager::{KeysManager, LoopStatus, RotationOutcome};
pub use receiver::{KeyState, KeyStateReceiver};
