//! `tunnelkey` Core Library
//!
//! Shared functionality for `tunnelkey` components:
//! - Configuration resolution and hierarchy
//! - Persisted daemon preferences (session and WireGuard credentials)
//! - Common error types
//! - Tracing initialization

pub mod config;
pub mod error;
pub mod preferences;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use preferences::{Preferences, SessionStatus};
