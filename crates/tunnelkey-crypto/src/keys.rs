//! WireGuard keypair management.
//!
//! A tunnel session is authenticated by an X25519 keypair. Keys travel and
//! persist in the WireGuard text form: standard base64 of the raw 32 bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// Raw length of an X25519 key in bytes.
pub const KEY_LEN: usize = 32;

/// Base64-encoded private key. Wiped on drop, never printed by `Debug`.
#[derive(Clone, Default)]
pub struct PrivateKey(Zeroizing<String>);

impl PrivateKey {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(Zeroizing::new(encoded.into()))
    }

    /// The base64 text. Handle with care.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("PrivateKey(<empty>)")
        } else {
            f.write_str("PrivateKey([REDACTED])")
        }
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for PrivateKey {}

/// An X25519 keypair in WireGuard format.
pub struct WgKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for WgKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgKeyPair")
            .field("public", &self.public_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl WgKeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        let secret = StaticSecret::from(arr);
        let public = PublicKey::from(&secret);
        arr.zeroize();
        Ok(Self { secret, public })
    }

    /// Reconstruct from a base64-encoded private key.
    pub fn from_private_key(private: &PrivateKey) -> Result<Self, CryptoError> {
        let mut raw = decode_key(private.expose())?;
        let result = Self::from_secret_bytes(&raw);
        raw.zeroize();
        result
    }

    /// Public key in WireGuard base64 form.
    pub fn public_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Private key in WireGuard base64 form.
    pub fn private_key(&self) -> PrivateKey {
        let mut bytes = self.secret.to_bytes();
        let encoded = STANDARD.encode(bytes);
        bytes.zeroize();
        PrivateKey::new(encoded)
    }

    /// Split into the `(public, private)` text pair that gets persisted.
    pub fn into_encoded(self) -> (String, PrivateKey) {
        (self.public_base64(), self.private_key())
    }

    /// SHA-256 fingerprint of the public key, for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.public.as_bytes())
    }
}

/// Derive the base64 public key that pairs with `private`.
pub fn public_key_for(private: &PrivateKey) -> Result<String, CryptoError> {
    WgKeyPair::from_private_key(private).map(|kp| kp.public_base64())
}

/// Colon-separated hex fingerprint of raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8; KEY_LEN]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey_bytes);
    hash.iter()
        .take(8)
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

fn decode_key(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
    if raw.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: raw.len(),
        });
    }
    Ok(raw)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_wireguard_sized() {
        let kp = WgKeyPair::generate();
        let (public, private) = kp.into_encoded();
        // 32 bytes -> 44 base64 chars with one '=' of padding
        assert_eq!(public.len(), 44);
        assert_eq!(private.expose().len(), 44);
        assert!(public.ends_with('='));
    }

    #[test]
    fn two_generations_differ() {
        let a = WgKeyPair::generate();
        let b = WgKeyPair::generate();
        assert_ne!(a.public_base64(), b.public_base64());
        assert_ne!(a.private_key(), b.private_key());
    }

    #[test]
    fn private_key_rebuilds_same_public_key() {
        let kp = WgKeyPair::generate();
        let private = kp.private_key();
        assert_eq!(public_key_for(&private).unwrap(), kp.public_base64());
    }

    #[test]
    fn wrong_length_secret_is_rejected() {
        let err = WgKeyPair::from_secret_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn garbage_base64_is_rejected() {
        let err = public_key_for(&PrivateKey::new("not base64 at all!")).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidEncoding(_)));
    }

    #[test]
    fn short_base64_is_rejected() {
        let err = public_key_for(&PrivateKey::new(STANDARD.encode([1u8; 8]))).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { actual: 8, .. }));
    }

    #[test]
    fn debug_output_hides_private_key() {
        let kp = WgKeyPair::generate();
        let private = kp.private_key();
        let printed = format!("{kp:?} {private:?}");
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains(private.expose()));
        assert!(printed.contains(&kp.public_base64()));
    }

    #[test]
    fn empty_private_key_debug() {
        let key = PrivateKey::default();
        assert!(key.is_empty());
        assert_eq!(format!("{key:?}"), "PrivateKey(<empty>)");
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let kp = WgKeyPair::from_secret_bytes(&[7u8; 32]).unwrap();
        let fp = kp.fingerprint();
        assert_eq!(fp, kp.fingerprint());
        assert_eq!(fp.split(':').count(), 8);
    }
}
