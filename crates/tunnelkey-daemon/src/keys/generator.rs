//! Keypair generation capability.

use tunnelkey_crypto::{CryptoError, PrivateKey, WgKeyPair};

/// Produces a fresh `(public, private)` keypair in WireGuard text form.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<(String, PrivateKey), CryptoError>;
}

/// In-process X25519 generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519KeyGenerator;

impl KeyGenerator for X25519KeyGenerator {
    fn generate(&self) -> Result<(String, PrivateKey), CryptoError> {
        Ok(WgKeyPair::generate().into_encoded())
    }
}
