//! Preferences-backed credential store.
//!
//! [`PreferencesStore`] owns the in-memory [`Preferences`] and its settings
//! file, and is what the daemon binds to the keys manager as its
//! [`KeyStateReceiver`]. Every committed change is written through to disk and
//! announced on a broadcast channel.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use tunnelkey_core::preferences::NewSession;
use tunnelkey_core::{Preferences, Result};
use tunnelkey_crypto::{PrivateKey, WgKeyPair};

use crate::keys::{KeyState, KeyStateReceiver};

/// Capacity of the key event broadcast channel.
const KEY_EVENT_CAPACITY: usize = 16;

/// Change notifications published by [`PreferencesStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// A new WireGuard keypair was committed.
    KeysChanged {
        public_key: String,
        local_address: IpAddr,
    },
    /// The account session was replaced (login or logout).
    SessionChanged,
}

pub struct PreferencesStore {
    path: PathBuf,
    prefs: RwLock<Preferences>,
    connected: AtomicBool,
    event_tx: broadcast::Sender<KeyEvent>,
}

impl std::fmt::Debug for PreferencesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferencesStore")
            .field("path", &self.path)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PreferencesStore {
    /// Load the settings file at `path` (missing file means defaults).
    pub fn load(path: impl Into<PathBuf>, default_interval: Duration) -> Result<Self> {
        let path = path.into();
        let prefs = Preferences::load(&path, default_interval)?;
        check_keypair(&prefs);
        Ok(Self::with_preferences(path, prefs))
    }

    /// Wrap already loaded preferences. Nothing is written until the first change.
    pub fn with_preferences(path: impl Into<PathBuf>, prefs: Preferences) -> Self {
        let (event_tx, _) = broadcast::channel(KEY_EVENT_CAPACITY);
        Self {
            path: path.into(),
            prefs: RwLock::new(prefs),
            connected: AtomicBool::new(false),
            event_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeyEvent> {
        self.event_tx.subscribe()
    }

    /// Record whether the VPN tunnel is currently up.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Snapshot of the current preferences.
    pub fn preferences(&self) -> Preferences {
        self.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.read().is_logged_in()
    }

    /// Replace the account session and persist it.
    pub fn set_session(&self, session: NewSession) -> Result<()> {
        {
            let mut prefs = self.write();
            prefs.set_session(session);
            prefs.save(&self.path)?;
        }
        info!("Session updated");
        self.publish(KeyEvent::SessionChanged);
        Ok(())
    }

    /// Change the rotation interval and persist it.
    pub fn set_regen_interval(&self, interval: Duration) -> Result<()> {
        let secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);
        let mut prefs = self.write();
        prefs.session.wg_keys_regen_interval_secs = secs;
        prefs.save(&self.path)?;
        info!(interval_secs = secs, "WireGuard key rotation interval updated");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Preferences> {
        self.prefs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Preferences> {
        self.prefs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: KeyEvent) {
        // No subscribers is not an error.
        if self.event_tx.send(event).is_err() {
            debug!("No key event subscribers");
        }
    }
}

impl KeyStateReceiver for PreferencesStore {
    fn current_key_state(&self) -> KeyState {
        let prefs = self.read();
        let s = &prefs.session;
        KeyState {
            session: s.session.clone(),
            public_key: s.wg_public_key.clone(),
            private_key: PrivateKey::new(s.wg_private_key.clone()),
            local_address: s.wg_local_ip.parse().ok(),
            generated_at: s.key_generated_at(),
            interval: s.regen_interval(),
        }
    }

    fn persist_new_key_state(
        &self,
        public_key: &str,
        private_key: &PrivateKey,
        local_address: IpAddr,
    ) -> Result<()> {
        {
            let mut prefs = self.write();
            prefs.update_wg_credentials(
                public_key,
                private_key.expose(),
                &local_address.to_string(),
            );
            prefs.save(&self.path)?;
        }
        self.publish(KeyEvent::KeysChanged {
            public_key: public_key.to_string(),
            local_address,
        });
        Ok(())
    }

    fn is_tunnel_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Log key events until the channel closes. Returns the number of events seen.
///
/// Takes an already subscribed receiver so that events published before the
/// task first runs are not missed.
pub async fn log_key_events(mut rx: broadcast::Receiver<KeyEvent>) -> usize {
    let mut seen = 0;
    loop {
        match rx.recv().await {
            Ok(KeyEvent::KeysChanged {
                public_key,
                local_address,
            }) => info!(%public_key, %local_address, "WireGuard credentials changed"),
            Ok(KeyEvent::SessionChanged) => info!("Session changed"),
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "Key event listener lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        }
        seen += 1;
    }
    seen
}

/// Warn when the stored private key does not belong to the stored public key.
fn check_keypair(prefs: &Preferences) {
    let s = &prefs.session;
    if s.wg_private_key.is_empty() || s.wg_public_key.is_empty() {
        return;
    }
    match WgKeyPair::from_private_key(&PrivateKey::new(s.wg_private_key.clone())) {
        Ok(pair) if pair.public_base64() == s.wg_public_key => {
            info!(fingerprint = %pair.fingerprint(), "Loaded WireGuard keypair");
        }
        Ok(_) => warn!("Stored WireGuard private key does not match the public key"),
        Err(e) => warn!(error = %e, "Stored WireGuard private key is malformed"),
    }
}
