// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `auth.json` credential store.
//!
//! File shape (written with mode 0600):
//!
//! ```json
//! {
//!   "auth_mode": "chatgpt",
//!   "OPENAI_API_KEY": "sk-...",
//!   "tokens": {
//!     "access_token": "...",
//!     "refresh_token": "...",
//!     "account_id": "acct_...",
//!     "id_token": "eyJ..."
//!   }
//! }
//! ```
//!
//! `id_token` is accepted both as a raw JWT string and as an object carrying
//! `{raw_jwt, chatgpt_account_id}` — older writers used the object form.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AuthError, RefreshConfig, TokenSource};

/// Authentication mode recorded in `auth.json`.
///
/// Unknown mode strings are preserved (not rejected): token selection for
/// them prefers the OAuth access token and falls back to the API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Chatgpt,
    ApiKey,
    #[serde(untagged)]
    Other(String),
}

/// The OAuth token triple plus the optional identity token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
}

/// `id_token` in either of its two historical forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdToken {
    Raw(String),
    Claims {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_jwt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chatgpt_account_id: Option<String>,
    },
}

/// Parsed contents of `auth.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthDotJson {
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    #[serde(
        rename = "OPENAI_API_KEY",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenBundle>,
}

fn default_auth_mode() -> AuthMode {
    // A file with no auth_mode field behaves like an unknown mode: the
    // access token is preferred and the API key is the fallback.
    AuthMode::Other(String::new())
}

impl Default for AuthDotJson {
    fn default() -> Self {
        Self {
            auth_mode: default_auth_mode(),
            openai_api_key: None,
            tokens: None,
        }
    }
}

/// Response body of the OAuth refresh-token exchange.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// File-backed `auth.json` store.
///
/// All observers and the commit phase of [`CodexAuthStore::refresh`]
/// serialize on one internal lock; the refresh HTTP round-trip runs with the
/// lock released so concurrent readers are never blocked on the network.
#[derive(Debug)]
pub struct CodexAuthStore {
    path: PathBuf,
    refresh_config: RefreshConfig,
    /// Whether [`TokenSource::refresh`] may touch the network.  Refresh is
    /// never attempted implicitly; the embedding application opts in.
    network_refresh: bool,
    state: Mutex<AuthDotJson>,
}

impl CodexAuthStore {
    /// Read and parse `auth.json` from `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let raw = fs::read_to_string(&path).map_err(|source| AuthError::Io {
            path: path.clone(),
            source,
        })?;
        let parsed: AuthDotJson =
            serde_json::from_str(&raw).map_err(|source| AuthError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            refresh_config: RefreshConfig::default(),
            network_refresh: false,
            state: Mutex::new(parsed),
        })
    }

    /// Load from the default location: `$CODEX_HOME/auth.json`, falling back
    /// to `$HOME/.codex/auth.json`.
    pub fn load_default() -> Result<Self, AuthError> {
        Self::load(default_auth_path())
    }

    /// Construct a store from already-parsed contents (tests, migrations).
    pub fn from_parts(path: impl Into<PathBuf>, auth: AuthDotJson) -> Self {
        Self {
            path: path.into(),
            refresh_config: RefreshConfig::default(),
            network_refresh: false,
            state: Mutex::new(auth),
        }
    }

    /// Override the OAuth token-endpoint configuration.
    pub fn with_refresh_config(mut self, cfg: RefreshConfig) -> Self {
        self.refresh_config = cfg;
        self
    }

    /// Permit [`TokenSource::refresh`] to perform the network exchange.
    pub fn with_network_refresh(mut self, allowed: bool) -> Self {
        self.network_refresh = allowed;
        self
    }

    /// The bearer token for the current mode.
    ///
    /// - `api_key` → the API key
    /// - `chatgpt` → the OAuth access token
    /// - anything else → access token, then API key
    ///
    /// Empty strings count as absent.
    pub fn authorization_token(&self) -> Result<String, AuthError> {
        let state = self.state.lock().unwrap();
        let access = state
            .tokens
            .as_ref()
            .and_then(|t| t.access_token.as_deref())
            .filter(|s| !s.is_empty());
        let key = state.openai_api_key.as_deref().filter(|s| !s.is_empty());
        let picked = match &state.auth_mode {
            AuthMode::ApiKey => key,
            AuthMode::Chatgpt => access,
            AuthMode::Other(_) => access.or(key),
        };
        picked.map(str::to_string).ok_or_else(|| AuthError::MissingToken {
            mode: mode_label(&state.auth_mode),
        })
    }

    /// The ChatGPT account id, from `tokens.account_id` or the id-token claims.
    pub fn account_id(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        let tokens = state.tokens.as_ref()?;
        if let Some(id) = tokens.account_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        match &tokens.id_token {
            Some(IdToken::Claims {
                chatgpt_account_id: Some(id),
                ..
            }) if !id.is_empty() => Some(id.clone()),
            _ => None,
        }
    }

    pub fn is_chatgpt(&self) -> bool {
        self.state.lock().unwrap().auth_mode == AuthMode::Chatgpt
    }

    /// Whether a refresh can be attempted at all (mode and refresh token).
    /// Network permission is checked separately at refresh time.
    pub fn can_refresh(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.auth_mode == AuthMode::Chatgpt
            && state
                .tokens
                .as_ref()
                .and_then(|t| t.refresh_token.as_deref())
                .is_some_and(|s| !s.is_empty())
    }

    /// Exchange the refresh token for a new access token and persist the
    /// result.  `allow_network` is the caller's explicit opt-in; without it
    /// the call fails with [`AuthError::RefreshUnavailable`] before any I/O.
    pub async fn refresh(
        &self,
        client: &reqwest::Client,
        allow_network: bool,
    ) -> Result<(), AuthError> {
        if !allow_network {
            return Err(AuthError::RefreshUnavailable(
                "network use not permitted by caller",
            ));
        }
        // Snapshot what the exchange needs, then release the lock for the
        // duration of the HTTP round-trip.
        let refresh_token = {
            let state = self.state.lock().unwrap();
            if state.auth_mode != AuthMode::Chatgpt {
                return Err(AuthError::RefreshUnavailable(
                    "auth mode does not support refresh",
                ));
            }
            state
                .tokens
                .as_ref()
                .and_then(|t| t.refresh_token.clone())
                .filter(|s| !s.is_empty())
                .ok_or(AuthError::RefreshUnavailable("no refresh token on file"))?
        };

        debug!(url = %self.refresh_config.token_url, "exchanging refresh token");
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

        // Commit under the lock, then persist the whole file.
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            let tokens = state.tokens.get_or_insert_with(TokenBundle::default);
            tokens.access_token = Some(access);
            if let Some(rt) = body.refresh_token.filter(|s| !s.is_empty()) {
                tokens.refresh_token = Some(rt);
            }
            if let Some(idt) = body.id_token.filter(|s| !s.is_empty()) {
                tokens.id_token = Some(IdToken::Raw(idt));
            }
            state.clone()
        };
        if let Err(e) = write_auth_file(&self.path, &snapshot) {
            warn!(path = %self.path.display(), "failed to persist refreshed credentials: {e}");
        }
        Ok(())
    }

    /// A copy of the current in-memory state (tests, inspection).
    pub fn snapshot(&self) -> AuthDotJson {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenSource for CodexAuthStore {
    fn bearer_token(&self) -> Result<String, AuthError> {
        self.authorization_token()
    }

    fn account_id(&self) -> Option<String> {
        CodexAuthStore::account_id(self)
    }

    fn can_refresh(&self) -> bool {
        self.network_refresh && CodexAuthStore::can_refresh(self)
    }

    async fn refresh(&self, client: &reqwest::Client) -> Result<(), AuthError> {
        CodexAuthStore::refresh(self, client, self.network_refresh).await
    }
}

fn mode_label(mode: &AuthMode) -> String {
    match mode {
        AuthMode::Chatgpt => "chatgpt".into(),
        AuthMode::ApiKey => "api_key".into(),
        AuthMode::Other(s) => s.clone(),
    }
}

/// Default `auth.json` location: `$CODEX_HOME` or `$HOME/.codex`.
pub(crate) fn default_auth_path() -> PathBuf {
    let home = std::env::var_os("CODEX_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".codex")
        });
    home.join("auth.json")
}

/// Guarded write: serialize to a sibling temp file with mode 0600, then
/// rename over the target so readers never observe a half-written file.
pub(crate) fn write_auth_file(path: &Path, auth: &AuthDotJson) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(auth).map_err(std::io::Error::other)?;
    write_secret_file(path, &body)
}

pub(crate) fn write_secret_file(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        use std::io::Write;
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut f = opts.open(&tmp)?;
        f.write_all(body)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
