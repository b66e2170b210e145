//! WireGuard keys manager: rotation scheduling and execution.
//!
//! Entry points may be called from any task. Rotation attempts are totally
//! ordered by an async mutex held for the duration of one attempt; the due
//! rule is evaluated once before taking it (cheap early exit) and again
//! while holding it, so a caller that lost the race sees the fresh key and
//! returns [`RotationOutcome::NotDue`] instead of rotating twice.
//!
//! The background loop is a tokio task that sleeps until the key is due,
//! rotates, and repeats. It is stopped through a per-loop `watch` channel;
//! stopping never interrupts an attempt that is already in progress.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::SystemTime;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::issuance::{IssuanceError, KeyIssuer};

use super::error::KeysError;
use super::generator::KeyGenerator;
use super::receiver::KeyStateReceiver;
use super::schedule::{is_due, next_wait};

/// Result of a rotation attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// A new key was issued and persisted.
    Rotated {
        public_key: String,
        local_address: IpAddr,
    },
    /// The active key is still fresh; nothing was done.
    NotDue,
}

/// Result of [`KeysManager::start_rotation_loop`] and
/// [`KeysManager::ensure_rotation_loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Started,
    /// A loop was already running and was left alone.
    AlreadyRunning,
    /// No key is provisioned yet; the first rotation will start the loop.
    NoActiveKey,
}

struct RotationLoop {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    receiver: OnceLock<Arc<dyn KeyStateReceiver>>,
    generator: Arc<dyn KeyGenerator>,
    issuer: Arc<dyn KeyIssuer>,
    /// Held for the whole of one rotation attempt.
    rotation_guard: tokio::sync::Mutex<()>,
    rotation_loop: Mutex<Option<RotationLoop>>,
}

/// WireGuard keys manager. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct KeysManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for KeysManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysManager")
            .field("initialized", &self.inner.receiver.get().is_some())
            .field("loop_running", &self.is_rotation_loop_running())
            .finish_non_exhaustive()
    }
}

impl KeysManager {
    pub fn new(generator: Arc<dyn KeyGenerator>, issuer: Arc<dyn KeyIssuer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                receiver: OnceLock::new(),
                generator,
                issuer,
                rotation_guard: tokio::sync::Mutex::new(()),
                rotation_loop: Mutex::new(None),
            }),
        }
    }

    /// Bind the credential store. Allowed exactly once.
    pub fn initialize(
        &self,
        receiver: Option<Arc<dyn KeyStateReceiver>>,
    ) -> Result<(), KeysError> {
        let receiver = receiver.ok_or(KeysError::InvalidReceiver)?;
        self.inner
            .receiver
            .set(receiver)
            .map_err(|_| KeysError::AlreadyInitialized)
    }

    fn receiver(&self) -> Result<&Arc<dyn KeyStateReceiver>, KeysError> {
        self.inner.receiver.get().ok_or(KeysError::NotInitialized)
    }

    fn rotation_loop(&self) -> MutexGuard<'_, Option<RotationLoop>> {
        self.inner
            .rotation_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background rotation loop, replacing a running one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_rotation_loop(&self) -> Result<LoopStatus, KeysError> {
        let receiver = self.receiver()?;

        let mut slot = self.rotation_loop();
        if let Some(old) = slot.take() {
            signal_stop(&old);
        }

        let state = receiver.current_key_state();
        if state.interval.is_zero() {
            return Err(KeysError::IntervalUndefined);
        }
        if !state.has_active_key() {
            info!("Active public WG key is not defined. WG key rotation disabled.");
            return Ok(LoopStatus::NoActiveKey);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_rotation_loop(stop_rx).await });
        *slot = Some(RotationLoop { stop_tx, task });

        info!(
            interval_secs = state.interval.as_secs(),
            "Keys rotation started"
        );
        Ok(LoopStatus::Started)
    }

    /// Start the rotation loop unless one is already running.
    ///
    /// Unlike [`start_rotation_loop`](Self::start_rotation_loop), a running
    /// loop keeps its timer.
    pub fn ensure_rotation_loop(&self) -> Result<LoopStatus, KeysError> {
        if self.is_rotation_loop_running() {
            return Ok(LoopStatus::AlreadyRunning);
        }
        self.start_rotation_loop()
    }

    /// Ask the running loop to stop. Never blocks; no-op when nothing runs.
    pub fn stop_rotation_loop(&self) {
        if let Some(running) = self.rotation_loop().take() {
            signal_stop(&running);
        }
    }

    pub fn is_rotation_loop_running(&self) -> bool {
        self.rotation_loop()
            .as_ref()
            .is_some_and(|l| !l.task.is_finished() && !*l.stop_tx.borrow())
    }

    /// Rotate now, regardless of schedule. Used for first-time provisioning.
    #[instrument(skip_all)]
    pub async fn generate_keys(&self) -> Result<RotationOutcome, KeysError> {
        self.attempt_rotation(true).await
    }

    /// Rotate only if the active key is due.
    #[instrument(skip_all)]
    pub async fn ensure_fresh(&self) -> Result<RotationOutcome, KeysError> {
        self.attempt_rotation(false).await
    }

    async fn attempt_rotation(&self, force: bool) -> Result<RotationOutcome, KeysError> {
        let result = self.rotate(force).await;
        if let Err(e) = &result {
            error!(error = %e, "Failed to update WG keys");
        }
        result
    }

    async fn rotate(&self, force: bool) -> Result<RotationOutcome, KeysError> {
        let receiver = self.receiver()?;

        // Advisory read, not guarded: return early when there is nothing to do.
        let state = receiver.current_key_state();
        if !is_due(force, &state, SystemTime::now())? {
            return Ok(RotationOutcome::NotDue);
        }

        let _guard = self.inner.rotation_guard.lock().await;

        // Another attempt may have completed while we waited.
        let state = receiver.current_key_state();
        if !is_due(force, &state, SystemTime::now())? {
            debug!("WG keys were updated concurrently; skipping");
            return Ok(RotationOutcome::NotDue);
        }

        info!("Updating WG keys...");

        let (public_key, private_key) = self
            .inner
            .generator
            .generate()
            .map_err(KeysError::KeyGenFailed)?;

        // Without a tunnel nothing depends on the old key, so register the new
        // key from scratch rather than referencing one the server may have dropped.
        let old_public_key = if receiver.is_tunnel_connected() {
            state.public_key.as_str()
        } else {
            ""
        };

        let local_address = self
            .inner
            .issuer
            .issue(&state.session, &public_key, old_public_key)
            .await
            .map_err(|e| {
                if matches!(e, IssuanceError::KeyNotFound) {
                    warn!("Server does not know the WG key being replaced");
                }
                KeysError::IssuanceFailed(e)
            })?;

        receiver
            .persist_new_key_state(&public_key, &private_key, local_address)
            .map_err(KeysError::PersistFailed)?;

        info!(
            local_address = %local_address,
            public_key = %public_key,
            "WG keys updated"
        );

        // First key for this session: automatic rotation starts now.
        if !state.has_active_key() {
            if let Err(e) = self.start_rotation_loop() {
                warn!(error = %e, "Unable to start WG keys rotation");
            }
        }

        Ok(RotationOutcome::Rotated {
            public_key,
            local_address,
        })
    }

    async fn run_rotation_loop(self, mut stop_rx: watch::Receiver<bool>) {
        let Ok(receiver) = self.receiver() else {
            return;
        };

        let mut last_attempt_failed = false;

        loop {
            let state = receiver.current_key_state();
            let wait = next_wait(
                state.generated_at,
                state.interval,
                last_attempt_failed,
                SystemTime::now(),
            );
            debug!(wait_secs = wait.as_secs(), "Next WG key rotation check");

            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                () = tokio::time::sleep(wait) => {
                    last_attempt_failed = self.ensure_fresh().await.is_err();
                    if last_attempt_failed {
                        warn!(
                            retry_in_secs = super::schedule::FAILURE_RETRY_INTERVAL.as_secs(),
                            "Scheduled WG key rotation failed"
                        );
                    }
                }
            }
        }

        info!("Keys rotation stopped");
    }
}

fn signal_stop(running: &RotationLoop) {
    // Err only means the loop has already exited.
    let _ = running.stop_tx.send(true);
}
