// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared HTTP request plumbing: retry with linear backoff and the
//! single-refresh-on-401 rule.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use tether_auth::{AuthError, TokenSource};

/// How many bytes of an error body are kept for diagnostics.
const MAX_ERROR_BODY_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt for 429/5xx responses.
    pub max_retries: u32,
    /// Linear backoff unit: attempt N sleeps `N × base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed with status {status} after {attempts} attempts")]
    RetryExhausted { status: u16, attempts: u32 },

    #[error("request failed with status {status}: {body_prefix}")]
    Fatal { status: u16, body_prefix: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send a request, retrying 429/5xx with linear backoff and refreshing
/// credentials at most once after a 401.
///
/// `build` is called once per attempt with the current bearer token (when a
/// token source is configured) so each attempt carries fresh credentials.
/// The refresh re-send does not consume a retry slot.
pub async fn send_with_retry<F>(
    client: &reqwest::Client,
    token_source: Option<&dyn TokenSource>,
    policy: &RetryPolicy,
    build: F,
) -> Result<reqwest::Response, TransportError>
where
    F: Fn(Option<&str>) -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    let mut refreshed = false;

    loop {
        attempt += 1;
        let token = match token_source {
            Some(src) => Some(src.bearer_token()?),
            None => None,
        };
        let resp = build(token.as_deref()).send().await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp);
        }

        if status == StatusCode::UNAUTHORIZED && !refreshed {
            if let Some(src) = token_source.filter(|s| s.can_refresh()) {
                debug!("401 from upstream; refreshing credentials once");
                src.refresh(client).await?;
                refreshed = true;
                // The refresh re-send is not a backoff retry.
                attempt -= 1;
                continue;
            }
        }

        if is_retryable(status) {
            if attempt <= policy.max_retries {
                let delay = policy.base_delay * attempt;
                warn!(
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retryable upstream status; backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(TransportError::RetryExhausted {
                status: status.as_u16(),
                attempts: attempt,
            });
        }

        return Err(TransportError::Fatal {
            status: status.as_u16(),
            body_prefix: body_prefix(resp).await,
        });
    }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of an error body.
async fn body_prefix(resp: reqwest::Response) -> String {
    match resp.bytes().await {
        Ok(bytes) => {
            let cut = bytes.len().min(MAX_ERROR_BODY_BYTES);
            String::from_utf8_lossy(&bytes[..cut]).into_owned()
        }
        Err(_) => String::new(),
    }
}
