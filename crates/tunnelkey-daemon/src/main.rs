//! tunnelkey Daemon
//!
//! Keeps the WireGuard credentials of the logged-in VPN session fresh by
//! rotating them against the key-issuance API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use tunnelkey_daemon::issuance::IssuanceClient;
use tunnelkey_daemon::keys::{KeyStateReceiver, KeysManager, X25519KeyGenerator};
use tunnelkey_daemon::store::{PreferencesStore, log_key_events};

#[derive(Parser, Debug)]
#[command(name = "tunnelkey-daemon")]
#[command(version, about = "tunnelkey daemon - WireGuard credential rotation")]
struct Args {
    /// Settings (preferences) file path
    #[arg(long, env = "TUNNELKEY_SETTINGS_PATH")]
    settings_path: Option<PathBuf>,

    /// Base URL of the key-issuance API
    #[arg(long, env = "TUNNELKEY_API_URL")]
    api_url: Option<String>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "TUNNELKEY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TUNNELKEY_LOG_JSON")]
    log_json: bool,

    /// Rotate the WireGuard keys once at startup, regardless of their age.
    #[arg(long)]
    rotate_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = tunnelkey_core::config::load_config().context("Failed to load config")?;
    if let Some(path) = args.settings_path {
        config.daemon.settings_path = Some(path);
    }
    if let Some(url) = args.api_url {
        config.issuance.api_url = url;
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }

    let log_filter = format!("tunnelkey_daemon={}", config.daemon.log_level);
    tunnelkey_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let settings_path = match config.daemon.settings_path.clone() {
        Some(path) => path,
        None => tunnelkey_core::config::settings_path()
            .context("Cannot determine settings directory")?,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        settings = %settings_path.display(),
        api_url = %config.issuance.api_url,
        "Starting tunnelkey-daemon"
    );

    let store = Arc::new(
        PreferencesStore::load(&settings_path, config.rotation.default_interval())
            .context("Failed to load preferences")?,
    );
    let issuer = IssuanceClient::new(&config.issuance).context("Invalid issuance config")?;

    let manager = KeysManager::new(Arc::new(X25519KeyGenerator), Arc::new(issuer));
    let receiver: Arc<dyn KeyStateReceiver> = store.clone();
    manager.initialize(Some(receiver))?;

    let events = tokio::spawn(log_key_events(store.subscribe()));

    if !store.is_logged_in() {
        info!("Not logged in; WG key rotation is idle");
    } else if args.rotate_now || !store.current_key_state().has_active_key() {
        // Errors are logged by the manager.
        if manager.generate_keys().await.is_err() {
            warn!("Startup key rotation failed");
        }
    }

    // Provisioning a first key has already started the loop.
    if store.current_key_state().has_active_key() {
        if let Err(e) = manager.ensure_rotation_loop() {
            error!(error = %e, "Failed to start WG keys rotation");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C shutdown signal");

    manager.stop_rotation_loop();
    events.abort();

    info!("Daemon stopped");
    Ok(())
}
