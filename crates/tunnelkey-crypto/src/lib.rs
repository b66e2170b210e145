//! `tunnelkey` key primitives
//!
//! WireGuard tunnel keys are X25519 keypairs exchanged as standard base64
//! strings (44 characters for 32 bytes). This crate generates them, parses
//! them back, and keeps private key material out of logs.

pub mod error;
pub mod keys;

pub use error::CryptoError;
pub use keys::{KEY_LEN, PrivateKey, WgKeyPair, fingerprint_of, public_key_for};
