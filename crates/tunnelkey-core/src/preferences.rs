//! Persisted daemon preferences.
//!
//! The preferences blob is the on-disk home of the account session and the
//! active WireGuard credentials (keypair, assigned tunnel address, generation
//! time and rotation interval). It is stored as JSON, readable by the owner
//! only.
//!
//! Files written by old client versions (<= 2.10.9) used different key names
//! and `"1"`-style string booleans; those are migrated on load.

use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DEFAULT_KEYS_INTERVAL;
use crate::error::{Error, Result};

/// Key that only exists in the legacy settings format.
const LEGACY_MARKER: &str = "\"firewall_is_persistent\"";

/// Daemon preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub is_logging: bool,
    #[serde(default)]
    pub is_fw_persistent: bool,
    #[serde(default)]
    pub is_fw_allow_lan: bool,
    #[serde(default)]
    pub is_fw_allow_lan_multicast: bool,
    #[serde(default)]
    pub is_stop_on_client_disconnect: bool,
    #[serde(default)]
    pub is_obfsproxy: bool,

    #[serde(default)]
    pub session: SessionStatus,
}

/// Account session and WireGuard credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStatus {
    pub account_id: String,
    pub session: String,
    pub vpn_user: String,
    pub vpn_pass: String,

    pub wg_public_key: String,
    pub wg_private_key: String,
    pub wg_local_ip: String,
    /// Unix seconds; `0` when no key is provisioned.
    pub wg_key_generated: i64,
    /// Seconds; non-positive means "not configured".
    pub wg_keys_regen_interval_secs: i64,
}

impl std::fmt::Debug for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStatus")
            .field("account_id", &self.account_id)
            .field("session", &"[REDACTED]")
            .field("vpn_user", &self.vpn_user)
            .field("vpn_pass", &"[REDACTED]")
            .field("wg_public_key", &self.wg_public_key)
            .field("wg_private_key", &"[REDACTED]")
            .field("wg_local_ip", &self.wg_local_ip)
            .field("wg_key_generated", &self.wg_key_generated)
            .field("wg_keys_regen_interval_secs", &self.wg_keys_regen_interval_secs)
            .finish()
    }
}

/// Credentials received on login.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub account_id: String,
    pub session: String,
    pub vpn_user: String,
    pub vpn_pass: String,
    pub wg_public_key: String,
    pub wg_private_key: String,
    pub wg_local_ip: String,
}

/// Legacy (<= 2.10.9) settings layout.
#[derive(Deserialize, Default)]
#[serde(default)]
struct LegacyPreferences {
    #[serde(rename = "enable_logging")]
    is_logging: String,
    #[serde(rename = "firewall_is_persistent")]
    is_fw_persistent: String,
    #[serde(rename = "firewall_allow_lan")]
    is_fw_allow_lan: String,
    #[serde(rename = "firewall_allow_lan_multicast")]
    is_fw_allow_lan_multicast: String,
    #[serde(rename = "is_stop_server_on_client_disconnect")]
    is_stop_on_client_disconnect: String,
    #[serde(rename = "enable_obfsproxy")]
    is_obfsproxy: String,
}

impl From<LegacyPreferences> for Preferences {
    fn from(old: LegacyPreferences) -> Self {
        Self {
            is_logging: old.is_logging == "1",
            is_fw_persistent: old.is_fw_persistent == "1",
            is_fw_allow_lan: old.is_fw_allow_lan == "1",
            is_fw_allow_lan_multicast: old.is_fw_allow_lan_multicast == "1",
            is_stop_on_client_disconnect: old.is_stop_on_client_disconnect == "1",
            is_obfsproxy: old.is_obfsproxy == "1",
            session: SessionStatus::default(),
        }
    }
}

impl Preferences {
    /// Load preferences from `path`. A missing file yields defaults.
    ///
    /// `default_interval` replaces a missing or non-positive rotation interval.
    pub fn load(path: &Path, default_interval: Duration) -> Result<Self> {
        let default_secs = i64::try_from(default_interval.as_secs()).unwrap_or(i64::MAX);

        if !path.exists() {
            info!(path = %path.display(), "No preferences file, using defaults");
            let mut prefs = Self::default();
            prefs.session.wg_keys_regen_interval_secs = default_secs;
            return Ok(prefs);
        }

        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::Preferences(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if data.contains(LEGACY_MARKER) {
            info!("Migrating preferences from legacy format");
            let old: LegacyPreferences = serde_json::from_str(&data)?;
            let mut prefs = Self::from(old);
            prefs.session.wg_keys_regen_interval_secs = default_secs;
            return Ok(prefs);
        }

        let mut prefs: Self = serde_json::from_str(&data)?;

        let s = &mut prefs.session;
        if s.wg_public_key.is_empty() || s.wg_private_key.is_empty() || s.wg_local_ip.is_empty() {
            s.wg_key_generated = 0;
        }

        if s.wg_keys_regen_interval_secs <= 0 {
            s.wg_keys_regen_interval_secs = default_secs;
            info!(
                interval_secs = s.wg_keys_regen_interval_secs,
                "Applied default WireGuard key rotation interval"
            );
            if let Err(e) = prefs.save(path) {
                warn!(error = %e, "Failed to save preferences after applying defaults");
            }
        }

        Ok(prefs)
    }

    /// Save preferences as JSON, readable and writable by the owner only.
    ///
    /// The file is written to a sibling temp file and renamed over `path`, so
    /// a crash mid-write leaves the previous contents intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Replace the session with freshly received login credentials.
    ///
    /// The rotation interval survives from the previous session.
    pub fn set_session(&mut self, new: NewSession) {
        let mut interval = self.session.wg_keys_regen_interval_secs;
        if interval <= 0 {
            interval = default_interval_secs();
        }

        self.session = SessionStatus {
            account_id: new.account_id.trim().to_string(),
            session: new.session.trim().to_string(),
            vpn_user: new.vpn_user.trim().to_string(),
            vpn_pass: new.vpn_pass.trim().to_string(),
            wg_keys_regen_interval_secs: interval,
            ..SessionStatus::default()
        };

        self.update_wg_credentials(&new.wg_public_key, &new.wg_private_key, &new.wg_local_ip);
    }

    /// Store a new WireGuard keypair and address, stamped with the current time.
    pub fn update_wg_credentials(&mut self, public_key: &str, private_key: &str, local_ip: &str) {
        let s = &mut self.session;
        s.wg_public_key = public_key.trim().to_string();
        s.wg_private_key = private_key.trim().to_string();
        s.wg_local_ip = local_ip.trim().to_string();
        s.wg_key_generated = if s.wg_public_key.is_empty() {
            0
        } else {
            unix_now()
        };
    }

    pub fn is_logged_in(&self) -> bool {
        !self.session.session.is_empty()
    }
}

impl SessionStatus {
    /// Configured rotation interval; zero when not configured.
    pub fn regen_interval(&self) -> Duration {
        u64::try_from(self.wg_keys_regen_interval_secs).map_or(Duration::ZERO, Duration::from_secs)
    }

    /// Key generation time, if a key is provisioned.
    pub fn key_generated_at(&self) -> Option<SystemTime> {
        let secs = u64::try_from(self.wg_key_generated).ok().filter(|s| *s > 0)?;
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn default_interval_secs() -> i64 {
    i64::try_from(DEFAULT_KEYS_INTERVAL.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn logged_in() -> Preferences {
        let mut prefs = Preferences::default();
        prefs.set_session(NewSession {
            account_id: " i-ABCD-EFGH ".into(),
            session: " sess-token ".into(),
            vpn_user: "user".into(),
            vpn_pass: "pass".into(),
            wg_public_key: "pub=".into(),
            wg_private_key: "priv=".into(),
            wg_local_ip: "10.0.0.2".into(),
        });
        prefs
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::load(&dir.path().join("nope.json"), DEFAULT_KEYS_INTERVAL).unwrap();
        assert!(!prefs.is_logged_in());
        assert_eq!(prefs.session.regen_interval(), DEFAULT_KEYS_INTERVAL);
    }

    #[test]
    fn set_session_trims_and_defaults_interval() {
        let prefs = logged_in();
        assert_eq!(prefs.session.account_id, "i-ABCD-EFGH");
        assert_eq!(prefs.session.session, "sess-token");
        assert_eq!(prefs.session.regen_interval(), DEFAULT_KEYS_INTERVAL);
        assert!(prefs.is_logged_in());
    }

    #[test]
    fn set_session_keeps_previous_interval() {
        let mut prefs = Preferences::default();
        prefs.session.wg_keys_regen_interval_secs = 3600;
        prefs.set_session(NewSession {
            session: "s".into(),
            ..NewSession::default()
        });
        assert_eq!(prefs.session.wg_keys_regen_interval_secs, 3600);
    }

    #[test]
    fn update_credentials_stamps_generation_time() {
        let before = unix_now();
        let prefs = logged_in();
        assert!(prefs.session.wg_key_generated >= before);
        assert!(prefs.session.key_generated_at().is_some());
    }

    #[test]
    fn clearing_credentials_clears_generation_time() {
        let mut prefs = logged_in();
        prefs.update_wg_credentials("", "", "");
        assert_eq!(prefs.session.wg_key_generated, 0);
        assert!(prefs.session.key_generated_at().is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("settings.json");
        let mut prefs = logged_in();
        prefs.is_fw_allow_lan = true;
        prefs.save(&path).unwrap();

        let loaded = Preferences::load(&path, DEFAULT_KEYS_INTERVAL).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        logged_in().save(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn save_replaces_file_instead_of_rewriting_in_place() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{\"is_logging\": true}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let before = std::fs::metadata(&path).unwrap().ino();

        let prefs = logged_in();
        prefs.save(&path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_ne!(meta.ino(), before, "expected a new file renamed into place");
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert_eq!(Preferences::load(&path, DEFAULT_KEYS_INTERVAL).unwrap(), prefs);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp file left behind");
    }

    #[test]
    fn incomplete_credentials_reset_generation_time_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut prefs = logged_in();
        prefs.session.wg_local_ip = String::new();
        prefs.save(&path).unwrap();

        let loaded = Preferences::load(&path, DEFAULT_KEYS_INTERVAL).unwrap();
        assert_eq!(loaded.session.wg_key_generated, 0);
    }

    #[test]
    fn non_positive_interval_is_defaulted_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut prefs = logged_in();
        prefs.session.wg_keys_regen_interval_secs = -5;
        prefs.save(&path).unwrap();

        let loaded = Preferences::load(&path, DEFAULT_KEYS_INTERVAL).unwrap();
        assert_eq!(loaded.session.regen_interval(), DEFAULT_KEYS_INTERVAL);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"wg_keys_regen_interval_secs\": 604800"));
    }

    #[test]
    fn legacy_file_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "enable_logging": "1",
                "firewall_is_persistent": "1",
                "firewall_allow_lan": "0",
                "firewall_allow_lan_multicast": "1",
                "is_stop_server_on_client_disconnect": "0",
                "enable_obfsproxy": "1"
            }"#,
        )
        .unwrap();

        let prefs = Preferences::load(&path, DEFAULT_KEYS_INTERVAL).unwrap();
        assert!(prefs.is_logging);
        assert!(prefs.is_fw_persistent);
        assert!(!prefs.is_fw_allow_lan);
        assert!(prefs.is_fw_allow_lan_multicast);
        assert!(!prefs.is_stop_on_client_disconnect);
        assert!(prefs.is_obfsproxy);
        assert!(!prefs.is_logged_in());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ broken").unwrap();
        assert!(matches!(Preferences::load(&path, DEFAULT_KEYS_INTERVAL), Err(Error::Json(_))));
    }

    #[test]
    fn debug_redacts_secrets() {
        let prefs = logged_in();
        let printed = format!("{prefs:?}");
        assert!(!printed.contains("sess-token"));
        assert!(!printed.contains("priv="));
        assert!(printed.contains("pub="));
    }
}
