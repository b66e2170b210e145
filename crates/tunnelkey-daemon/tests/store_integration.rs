#![allow(clippy::unwrap_used, clippy::panic)] // Integration tests use unwrap for brevity

//! End-to-end rotation through the preferences store and the HTTP issuance
//! client, against a mock issuance API.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tunnelkey_core::Preferences;
use tunnelkey_core::config::{DEFAULT_KEYS_INTERVAL, IssuanceConfig};
use tunnelkey_core::preferences::NewSession;
use tunnelkey_daemon::issuance::{IssuanceClient, WG_KEY_SET_PATH};
use tunnelkey_daemon::keys::{KeyStateReceiver, KeysManager, RotationOutcome, X25519KeyGenerator};
use tunnelkey_daemon::store::{KeyEvent, PreferencesStore};

async fn issuance_api(ip: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(WG_KEY_SET_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 200, "ip_address": ip})),
        )
        .mount(&server)
        .await;
    server
}

fn logged_in_store(dir: &TempDir) -> Arc<PreferencesStore> {
    let store =
        PreferencesStore::load(dir.path().join("settings.json"), DEFAULT_KEYS_INTERVAL).unwrap();
    store
        .set_session(NewSession {
            account_id: "i-AAAA-BBBB-CCCC".into(),
            session: "  session-token\n".into(),
            ..NewSession::default()
        })
        .unwrap();
    Arc::new(store)
}

fn manager_for(store: &Arc<PreferencesStore>, api_url: &str) -> KeysManager {
    let client = IssuanceClient::new(&IssuanceConfig {
        api_url: api_url.to_string(),
        ..IssuanceConfig::default()
    })
    .unwrap();
    let manager = KeysManager::new(Arc::new(X25519KeyGenerator), Arc::new(client));
    let receiver: Arc<dyn KeyStateReceiver> = store.clone();
    manager.initialize(Some(receiver)).unwrap();
    manager
}

#[tokio::test]
async fn login_then_provision_writes_settings_file() {
    let server = issuance_api("172.28.3.14").await;
    let dir = TempDir::new().unwrap();
    let store = logged_in_store(&dir);
    let mut events = store.subscribe();
    let manager = manager_for(&store, &server.uri());

    let RotationOutcome::Rotated { public_key, .. } = manager.generate_keys().await.unwrap() else {
        panic!("forced rotation always rotates on success");
    };

    assert_eq!(
        events.recv().await.unwrap(),
        KeyEvent::KeysChanged {
            public_key: public_key.clone(),
            local_address: "172.28.3.14".parse().unwrap(),
        }
    );

    let on_disk = Preferences::load(store.path(), DEFAULT_KEYS_INTERVAL).unwrap();
    assert_eq!(on_disk.session.session, "session-token");
    assert_eq!(on_disk.session.wg_public_key, public_key);
    assert_eq!(on_disk.session.wg_local_ip, "172.28.3.14");
    assert!(on_disk.session.wg_key_generated > 0);
    assert!(!on_disk.session.wg_private_key.is_empty());

    assert!(manager.is_rotation_loop_running());
    manager.stop_rotation_loop();
}

#[tokio::test]
async fn request_carries_session_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(WG_KEY_SET_PATH))
        .and(wiremock::matchers::body_partial_json(
            json!({"session_token": "session-token"}),
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": 200, "ip_address": "10.1.1.1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = logged_in_store(&dir);
    let manager = manager_for(&store, &server.uri());

    assert!(manager.ensure_fresh().await.is_ok());
    manager.stop_rotation_loop();
}

#[tokio::test]
async fn rejected_session_keeps_previous_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 601,
            "message": "Session not found"
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = logged_in_store(&dir);
    let manager = manager_for(&store, &server.uri());

    assert!(manager.generate_keys().await.is_err());
    assert!(!store.current_key_state().has_active_key());
    assert!(!manager.is_rotation_loop_running());
}
