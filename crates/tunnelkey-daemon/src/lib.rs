//! tunnelkey Daemon Library
//!
//! WireGuard credential rotation for the VPN daemon:
//! - Keys manager: scheduled and on-demand key rotation
//! - Issuance API client for registering new public keys
//! - Preferences-backed credential store

pub mod issuance;
pub mod keys;
pub mod store;
