//! Key-issuance endpoint integration.
//!
//! The issuance endpoint binds a freshly generated WireGuard public key to the
//! account session and answers with the tunnel-local address assigned to it.

mod client;


use std::net::IpAddr;

use async_trait::async_trait;

pub use client::{IssuanceClient, IssuanceError, WG_KEY_SET_PATH};

/// Registers a new public key with the remote service, retiring `old_public_key`
/// when it is non-empty.
#[async_trait]
pub trait KeyIssuer: Send + Sync {
    async fn issue(
        &self,
        session: &str,
        public_key: &str,
        old_public_key: &str,
    ) -> Result<IpAddr, IssuanceError>;
}
