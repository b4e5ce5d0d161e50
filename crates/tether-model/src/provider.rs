// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{Turn, TurnEvent};

/// The uniform event stream every adapter returns.
///
/// Dropping the stream aborts the turn: the adapter's HTTP response is owned
/// by the stream, so the connection is closed and released at the next await
/// point.  Callers enforce overall timeouts by racing the stream against
/// their own deadline.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<TurnEvent>> + Send>>;

/// A provider-specific implementation of the harness interface.
///
/// Adapters are shareable across concurrent turns: the underlying HTTP
/// client is safe for concurrent use and all per-turn state (SSE buffers,
/// tool-call collectors) lives inside the returned stream.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable adapter id for logs and registry lookups.
    fn name(&self) -> &str;

    /// Open a streaming turn.  Events arrive in wire order; a `Usage` event
    /// (when the provider reports one) always precedes `Done`.
    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream>;
}
