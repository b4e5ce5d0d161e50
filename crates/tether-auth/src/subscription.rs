// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subscription-style OAuth store.
//!
//! The backing file holds a `claudeAiOauth` subtree next to whatever other
//! keys the owning application keeps there.  Rewrites merge only our subtree
//! back in; every other top-level key is preserved verbatim.
//!
//! ```json
//! {
//!   "claudeAiOauth": {
//!     "accessToken": "sk-ant-oat...",
//!     "refreshToken": "sk-ant-ort...",
//!     "expiresAt": 1767225600000,
//!     "subscriptionType": "max"
//!   }
//! }
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::codex::write_secret_file;
use crate::{AuthError, RefreshConfig, TokenSource};

const OAUTH_KEY: &str = "claudeAiOauth";

/// The recognized subtree of the credential file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthCredentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Expiry as a millisecond unix epoch.
    pub expires_at: i64,
    #[serde(default)]
    pub subscription_type: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// File-backed subscription OAuth store.
///
/// The file is loaded lazily on first use so a store can be constructed for
/// a path that does not exist yet.  Shared-state rules match
/// [`crate::CodexAuthStore`]: one lock, network phase outside it.
pub struct SubscriptionAuthStore {
    path: PathBuf,
    refresh_config: RefreshConfig,
    state: Mutex<Option<OauthCredentials>>,
}

impl SubscriptionAuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            refresh_config: RefreshConfig {
                token_url: "https://console.anthropic.com/v1/oauth/token".into(),
                client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e".into(),
                scope: "user:inference".into(),
            },
            state: Mutex::new(None),
        }
    }

    /// Override the OAuth token-endpoint configuration.
    pub fn with_refresh_config(mut self, cfg: RefreshConfig) -> Self {
        self.refresh_config = cfg;
        self
    }

    /// Expiry of the current access token, milliseconds since the epoch.
    pub fn expires_at(&self) -> Result<i64, AuthError> {
        Ok(self.credentials()?.expires_at)
    }

    /// Whether the access token has expired (wall clock, milliseconds).
    pub fn is_expired(&self) -> Result<bool, AuthError> {
        Ok(now_ms() >= self.expires_at()?)
    }

    /// The access token, loading the file on first call.
    pub fn access_token(&self) -> Result<String, AuthError> {
        let creds = self.credentials()?;
        if creds.access_token.is_empty() {
            return Err(AuthError::MissingToken {
                mode: "subscription".into(),
            });
        }
        Ok(creds.access_token)
    }

    pub fn subscription_type(&self) -> Result<String, AuthError> {
        Ok(self.credentials()?.subscription_type)
    }

    /// Exchange the refresh token for a new access token and persist.
    ///
    /// Fails with [`AuthError::RefreshUnavailable`] when no refresh token is
    /// on file — that case is distinguishable from a server-side rejection.
    pub async fn refresh(&self, client: &reqwest::Client) -> Result<(), AuthError> {
        let refresh_token = {
            let creds = self.credentials()?;
            if creds.refresh_token.is_empty() {
                return Err(AuthError::RefreshUnavailable("no refresh token on file"));
            }
            creds.refresh_token
        };

        debug!(url = %self.refresh_config.token_url, "exchanging subscription refresh token");
        let resp = client
            .post(&self.refresh_config.token_url)
            .json(&serde_json::json!({
                "client_id": self.refresh_config.client_id,
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "scope": self.refresh_config.scope,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                detail,
            });
        }
        let body: RefreshResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                detail: err,
            });
        }
        let access = body.access_token.filter(|s| !s.is_empty()).ok_or(
            AuthError::RefreshRejected {
                status: status.as_u16(),
                detail: "token endpoint returned no access_token".into(),
            },
        )?;

        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let creds = state.get_or_insert_with(OauthCredentials::default);
            creds.access_token = access;
            if let Some(rt) = body.refresh_token.filter(|s| !s.is_empty()) {
                creds.refresh_token = rt;
            }
            if let Some(secs) = body.expires_in {
                creds.expires_at = now_ms() + secs * 1000;
            }
            creds.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            warn!(path = %self.path.display(), "failed to persist refreshed credentials: {e}");
        }
        Ok(())
    }

    /// Current credentials, loading from disk on first use.
    fn credentials(&self) -> Result<OauthCredentials, AuthError> {
        let mut state = self.state.lock().unwrap();
        if let Some(creds) = state.as_ref() {
            return Ok(creds.clone());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| AuthError::Io {
            path: self.path.clone(),
            source,
        })?;
        let root: Value = serde_json::from_str(&raw).map_err(|source| AuthError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let creds: OauthCredentials = serde_json::from_value(root[OAUTH_KEY].clone())
            .map_err(|source| AuthError::Parse {
                path: self.path.clone(),
                source,
            })?;
        *state = Some(creds.clone());
        Ok(creds)
    }

    /// Merge the recognized subtree into the existing file, preserving every
    /// other top-level key, and write with mode 0600.
    fn persist(&self, creds: &OauthCredentials) -> std::io::Result<()> {
        let mut root: Value = fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));
        if !root.is_object() {
            root = Value::Object(Default::default());
        }
        root[OAUTH_KEY] = serde_json::to_value(creds).map_err(std::io::Error::other)?;
        let body = serde_json::to_vec_pretty(&root).map_err(std::io::Error::other)?;
        write_secret_file(&self.path, &body)
    }
}

#[async_trait]
impl TokenSource for SubscriptionAuthStore {
    fn bearer_token(&self) -> Result<String, AuthError> {
        self.access_token()
    }

    fn can_refresh(&self) -> bool {
        self.credentials()
            .map(|c| !c.refresh_token.is_empty())
            .unwrap_or(false)
    }

    async fn refresh(&self, client: &reqwest::Client) -> Result<(), AuthError> {
        SubscriptionAuthStore::refresh(self, client).await
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("credentials.json");
        fs::write(&path, json).unwrap();
        path
    }

    fn far_future_ms() -> i64 {
        now_ms() + 86_400_000
    }

    #[test]
    fn access_token_loads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            &format!(
                r#"{{"claudeAiOauth":{{"accessToken":"sk-ant-oat-1","refreshToken":"sk-ant-ort-1","expiresAt":{},"subscriptionType":"max"}}}}"#,
                far_future_ms()
            ),
        );
        let store = SubscriptionAuthStore::new(&path);
        assert_eq!(store.access_token().unwrap(), "sk-ant-oat-1");
        assert_eq!(store.subscription_type().unwrap(), "max");
        assert!(!store.is_expired().unwrap());
    }

    #[test]
    fn expired_timestamp_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            r#"{"claudeAiOauth":{"accessToken":"tok","refreshToken":"","expiresAt":1000,"subscriptionType":"pro"}}"#,
        );
        let store = SubscriptionAuthStore::new(&path);
        assert!(store.is_expired().unwrap());
        assert_eq!(store.expires_at().unwrap(), 1000);
    }

    #[test]
    fn missing_file_surfaces_io_error() {
        let store = SubscriptionAuthStore::new("/nonexistent/credentials.json");
        assert!(matches!(store.access_token(), Err(AuthError::Io { .. })));
    }

    #[test]
    fn missing_subtree_surfaces_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, r#"{"somethingElse": true}"#);
        let store = SubscriptionAuthStore::new(&path);
        assert!(matches!(store.access_token(), Err(AuthError::Parse { .. })));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            r#"{"claudeAiOauth":{"accessToken":"tok","refreshToken":"","expiresAt":1000,"subscriptionType":""}}"#,
        );
        let store = SubscriptionAuthStore::new(&path);
        let client = reqwest::Client::new();
        let err = store.refresh(&client).await.unwrap_err();
        assert!(
            matches!(err, AuthError::RefreshUnavailable(_)),
            "expected RefreshUnavailable, got {err:?}"
        );
    }

    #[test]
    fn persist_preserves_unknown_top_level_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            r#"{
                "claudeAiOauth":{"accessToken":"old","refreshToken":"r","expiresAt":1,"subscriptionType":"pro"},
                "installId":"abc-123",
                "settings":{"theme":"dark"}
            }"#,
        );
        let store = SubscriptionAuthStore::new(&path);
        let creds = OauthCredentials {
            access_token: "new".into(),
            refresh_token: "r2".into(),
            expires_at: 99,
            subscription_type: "pro".into(),
        };
        store.persist(&creds).unwrap();

        let root: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(root["installId"], "abc-123", "unknown keys must survive");
        assert_eq!(root["settings"]["theme"], "dark");
        assert_eq!(root["claudeAiOauth"]["accessToken"], "new");
        assert_eq!(root["claudeAiOauth"]["expiresAt"], 99);
    }

    #[test]
    fn persist_creates_file_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = SubscriptionAuthStore::new(&path);
        let creds = OauthCredentials {
            access_token: "tok".into(),
            refresh_token: String::new(),
            expires_at: 5,
            subscription_type: String::new(),
        };
        store.persist(&creds).unwrap();
        let root: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(root["claudeAiOauth"]["accessToken"], "tok");
    }

    #[cfg(unix)]
    #[test]
    fn persisted_file_has_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = SubscriptionAuthStore::new(&path);
        store.persist(&OauthCredentials::default()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn camel_case_wire_names_round_trip() {
        let creds = OauthCredentials {
            access_token: "a".into(),
            refresh_token: "b".into(),
            expires_at: 42,
            subscription_type: "max".into(),
        };
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("\"accessToken\""));
        assert!(json.contains("\"expiresAt\""));
        let back: OauthCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back, creds);
    }
}
