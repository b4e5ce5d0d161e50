// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Credential stores for the tether harness.
//!
//! Two file-backed stores are provided:
//!
//! - [`CodexAuthStore`] — the `auth.json` store used by the Responses and
//!   chat adapters.  Holds either a plain API key or a ChatGPT OAuth token
//!   triple, and can exchange its refresh token for a new access token.
//! - [`SubscriptionAuthStore`] — the subscription-style OAuth store used by
//!   the Anthropic adapter.  Tracks token expiry in millisecond epochs and
//!   preserves unrecognized keys in the backing file across rewrites.
//!
//! Both stores are internally synchronized and may be shared between
//! concurrent adapters behind an `Arc`.  The network phase of a refresh runs
//! with the store lock released; observers either see the old token or the
//! new one, never a torn value.

mod codex;
mod subscription;

pub use codex::{AuthDotJson, AuthMode, CodexAuthStore, IdToken, TokenBundle};
pub use subscription::{OauthCredentials, SubscriptionAuthStore};

use async_trait::async_trait;
use std::path::PathBuf;

/// Errors surfaced by credential stores.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable token exists for the store's current mode.
    #[error("no usable credential for auth mode {mode:?}")]
    MissingToken { mode: String },

    /// The store cannot refresh: wrong mode, no refresh token, or the caller
    /// has not permitted network use.
    #[error("credential refresh unavailable: {0}")]
    RefreshUnavailable(&'static str),

    /// The token endpoint answered with a non-success status or an error body.
    #[error("credential refresh rejected (status {status}): {detail}")]
    RefreshRejected { status: u16, detail: String },

    #[error("failed to read credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("refresh request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// OAuth token-endpoint configuration.
///
/// The refresh URL, client id, and scope are process-wide in spirit but are
/// injected per store so tests can point them at a local listener.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub token_url: String,
    pub client_id: String,
    pub scope: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            token_url: "https://auth.openai.com/oauth/token".into(),
            client_id: "app_EMoamEEZ73f0CkXaXp7hrann".into(),
            scope: "openid profile email offline_access".into(),
        }
    }
}

/// A source of bearer tokens for HTTP requests.
///
/// Implemented by both credential stores and by [`StaticToken`] for plain
/// API keys.  The retry layer in `tether-model` uses this to obtain a token
/// per attempt and to request a single refresh after a 401.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The current bearer token.
    fn bearer_token(&self) -> Result<String, AuthError>;

    /// Account identifier forwarded as a request header, when known.
    fn account_id(&self) -> Option<String> {
        None
    }

    /// Whether [`TokenSource::refresh`] has any chance of succeeding.
    fn can_refresh(&self) -> bool {
        false
    }

    /// Exchange the refresh token for a new access token.
    async fn refresh(&self, _client: &reqwest::Client) -> Result<(), AuthError> {
        Err(AuthError::RefreshUnavailable("token source is not refreshable"))
    }
}

/// A fixed token (plain API key).  Never refreshable.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::MissingToken {
                mode: "static".into(),
            });
        }
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_returns_value() {
        let t = StaticToken("sk-test".into());
        assert_eq!(t.bearer_token().unwrap(), "sk-test");
    }

    #[test]
    fn static_token_empty_is_missing() {
        let t = StaticToken(String::new());
        assert!(matches!(
            t.bearer_token(),
            Err(AuthError::MissingToken { .. })
        ));
    }

    #[test]
    fn static_token_is_not_refreshable() {
        let t = StaticToken("sk-test".into());
        assert!(!t.can_refresh());
    }
}
