// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The provider-neutral tool loop and turn logging.

mod driver;
mod logging;

pub use driver::{
    run_tool_loop, run_tool_loop_with_cancel, stream_and_collect, Cancelled, EventHook, LoopError,
    LoopOptions, ToolHandler, ToolOutcome,
};
pub use logging::{replay, LoggingAdapter, MAX_LINE_BYTES};
