//! HTTP client for the WireGuard key-issuance API.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tunnelkey_core::config::IssuanceConfig;

use super::KeyIssuer;

/// Path of the "set WireGuard key" endpoint.
pub const WG_KEY_SET_PATH: &str = "/v4/session/wg/set";

/// API status code for success.
const STATUS_SUCCESS: u16 = 200;

/// API status code returned when `connected_public_key` is unknown server-side.
const STATUS_WG_PUBLIC_KEY_NOT_FOUND: u16 = 425;

/// Issuance client errors.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Issuance API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Public key to replace is not known to the server")]
    KeyNotFound,

    #[error("Invalid issuance response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
struct WgKeySetRequest<'a> {
    session_token: &'a str,
    public_key: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    connected_public_key: &'a str,
}

#[derive(Deserialize)]
struct WgKeySetResponse {
    status: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    ip_address: String,
}

/// Key-issuance API client.
#[derive(Debug)]
pub struct IssuanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl IssuanceClient {
    /// Create a new issuance client.
    pub fn new(config: &IssuanceConfig) -> Result<Self, IssuanceError> {
        if config.api_url.is_empty() {
            return Err(IssuanceError::Config("api_url is empty".into()));
        }
        if !(config.api_url.starts_with("https://") || config.api_url.starts_with("http://")) {
            return Err(IssuanceError::Config(format!(
                "api_url must be an http(s) URL: {}",
                config.api_url
            )));
        }
        if config.http_timeout_secs == 0 || config.connect_timeout_secs == 0 {
            return Err(IssuanceError::Config("timeouts must be positive".into()));
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        let base_url = config.api_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register `public_key` for `session`, replacing `connected_public_key`
    /// when it is non-empty. Returns the assigned tunnel-local address.
    pub async fn set_wg_key(
        &self,
        session: &str,
        public_key: &str,
        connected_public_key: &str,
    ) -> Result<IpAddr, IssuanceError> {
        let request = WgKeySetRequest {
            session_token: session,
            public_key,
            connected_public_key,
        };

        let resp = self
            .http
            .post(self.api_url(WG_KEY_SET_PATH))
            .json(&request)
            .send()
            .await?;
        let http_status = resp.status();
        let body = resp.bytes().await?;

        debug!(http_status = http_status.as_u16(), "Issuance API responded");

        let Ok(parsed) = serde_json::from_slice::<WgKeySetResponse>(&body) else {
            if !http_status.is_success() {
                return Err(IssuanceError::Api {
                    status: http_status.as_u16(),
                    message: http_status.canonical_reason().unwrap_or("Unknown").into(),
                });
            }
            return Err(IssuanceError::InvalidResponse(
                "body is not a key-set response".into(),
            ));
        };

        parse_key_set_response(parsed)
    }
}

fn parse_key_set_response(resp: WgKeySetResponse) -> Result<IpAddr, IssuanceError> {
    match resp.status {
        STATUS_SUCCESS => resp.ip_address.trim().parse().map_err(|_| {
            IssuanceError::InvalidResponse(format!("bad ip_address {:?}", resp.ip_address))
        }),
        STATUS_WG_PUBLIC_KEY_NOT_FOUND => Err(IssuanceError::KeyNotFound),
        status => Err(IssuanceError::Api {
            status,
            message: resp.message,
        }),
    }
}

#[async_trait]
impl KeyIssuer for IssuanceClient {
    async fn issue(
        &self,
        session: &str,
        public_key: &str,
        old_public_key: &str,
    ) -> Result<IpAddr, IssuanceError> {
        self.set_wg_key(session, public_key, old_public_key).await
    }
}
