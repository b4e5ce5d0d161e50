// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSONL turn logging and offline replay.
//!
//! [`LoggingAdapter`] decorates any [`Adapter`] and records one file per
//! turn:
//!
//! ```text
//! {"ts":"…","type":"turn_start","turn":{…}}
//! {"ts":"…","type":"event","kind":"text_delta","event":{…},"latency_ms":12}
//! {"ts":"…","type":"turn_end","total_ms":840,"usage":{…}}
//! ```
//!
//! File names are `<timestamp>-<seq>.jsonl`; the sequence number is a
//! process-local counter, so simultaneous turns from *different* processes
//! landing on the same second can still collide.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::warn;

use tether_model::{Adapter, EventKind, EventStream, Turn, Usage};

/// Replay refuses lines larger than this.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// How much of the instructions survives redaction.
const REDACTED_INSTRUCTIONS_CHARS: usize = 20;

/// Decorator that writes per-turn JSONL logs around an inner adapter.
pub struct LoggingAdapter {
    inner: Arc<dyn Adapter>,
    dir: PathBuf,
    redact: bool,
    seq: AtomicU64,
}

impl LoggingAdapter {
    /// Log turns of `inner` into `dir` (created on first use).
    pub fn new(inner: Arc<dyn Adapter>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
            redact: false,
            seq: AtomicU64::new(0),
        }
    }

    /// Redact sensitive turn content in `turn_start` lines: instructions are
    /// truncated to their first 20 characters and AGENTS content is replaced
    /// with `[REDACTED]`.
    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    fn next_log_path(&self) -> PathBuf {
        let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.dir.join(format!("{ts}-{seq:04}.jsonl"))
    }

    fn turn_snapshot(&self, turn: &Turn) -> Value {
        let mut snapshot = serde_json::to_value(turn).unwrap_or(Value::Null);
        if self.redact {
            if let Some(instructions) = snapshot
                .get("instructions")
                .and_then(Value::as_str)
                .map(str::to_string)
            {
                let kept: String = instructions
                    .chars()
                    .take(REDACTED_INSTRUCTIONS_CHARS)
                    .collect();
                snapshot["instructions"] = json!(kept);
            }
            if let Some(content) = snapshot
                .pointer_mut("/user_context/agents_doc/content")
                .filter(|c| !c.is_null())
            {
                *content = json!("[REDACTED]");
            }
        }
        snapshot
    }
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn write_line(file: &Mutex<File>, line: &Value) {
    let mut file = file.lock().unwrap();
    if let Err(e) = writeln!(file, "{line}") {
        warn!("failed to write turn log line: {e}");
    }
}

#[async_trait]
impl Adapter for LoggingAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream> {
        fs::create_dir_all(&self.dir)?;
        let path = self.next_log_path();
        let file = Arc::new(Mutex::new(File::create(&path)?));

        write_line(
            &file,
            &json!({
                "ts": now_ts(),
                "type": "turn_start",
                "turn": self.turn_snapshot(turn),
            }),
        );

        let inner_stream = match self.inner.stream_turn(turn).await {
            Ok(s) => s,
            Err(e) => {
                write_line(
                    &file,
                    &json!({
                        "ts": now_ts(),
                        "type": "turn_end",
                        "total_ms": 0,
                        "error": e.to_string(),
                    }),
                );
                return Err(e);
            }
        };

        let started = Instant::now();
        let state: Arc<Mutex<(Option<Usage>, bool)>> = Arc::new(Mutex::new((None, false)));
        let logged = inner_stream.map(move |item| {
            match &item {
                Ok(event) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    write_line(
                        &file,
                        &json!({
                            "ts": now_ts(),
                            "type": "event",
                            "kind": event.kind.tag(),
                            "event": &event.kind,
                            "latency_ms": latency_ms,
                        }),
                    );
                    let mut state = state.lock().unwrap();
                    if let EventKind::Usage(u) = &event.kind {
                        state.0 = Some(*u);
                    }
                    if event.kind == EventKind::Done && !state.1 {
                        state.1 = true;
                        let mut end = json!({
                            "ts": now_ts(),
                            "type": "turn_end",
                            "total_ms": started.elapsed().as_millis() as u64,
                        });
                        if let Some(usage) = &state.0 {
                            end["usage"] = json!(usage);
                        }
                        write_line(&file, &end);
                    }
                }
                Err(e) => {
                    let mut state = state.lock().unwrap();
                    if !state.1 {
                        state.1 = true;
                        write_line(
                            &file,
                            &json!({
                                "ts": now_ts(),
                                "type": "turn_end",
                                "total_ms": started.elapsed().as_millis() as u64,
                                "error": e.to_string(),
                            }),
                        );
                    }
                }
            }
            item
        });
        Ok(Box::pin(logged))
    }
}

// ─── Replay ───────────────────────────────────────────────────────────────────

/// Read the event sequence back out of a turn log.
///
/// Oversized and unparseable lines are skipped with a warning; only `event`
/// lines contribute to the result.
pub fn replay(path: impl AsRef<Path>) -> anyhow::Result<Vec<EventKind>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut events = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.len() > MAX_LINE_BYTES {
            warn!(lineno, "skipping oversized turn-log line");
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(&line) else {
            warn!(lineno, "skipping unparseable turn-log line");
            continue;
        };
        if record["type"].as_str() != Some("event") {
            continue;
        }
        match serde_json::from_value::<EventKind>(record["event"].clone()) {
            Ok(kind) => events.push(kind),
            Err(e) => warn!(lineno, "skipping undecodable event: {e}"),
        }
    }
    Ok(events)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tether_model::{AgentsDoc, Message, ScriptedAdapter};

    async fn drain(mut stream: EventStream) {
        while let Some(item) = stream.next().await {
            let event = item.unwrap();
            if event.kind == EventKind::Done {
                break;
            }
        }
    }

    fn log_lines(dir: &Path) -> Vec<Value> {
        let mut paths: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        paths.sort();
        let content = fs::read_to_string(paths.last().unwrap()).unwrap();
        content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn logged_turn() -> Turn {
        Turn {
            model: "scripted".into(),
            instructions: Some("This is a long instruction block with secrets".into()),
            messages: vec![Message::user("hello")],
            user_context: tether_model::UserContext {
                agents_doc: Some(AgentsDoc {
                    directory: ".".into(),
                    content: "private project notes".into(),
                }),
                ..Default::default()
            },
            ..Turn::default()
        }
    }

    #[tokio::test]
    async fn log_contains_start_events_and_end() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LoggingAdapter::new(
            Arc::new(ScriptedAdapter::always_text("hi")),
            dir.path(),
        );
        let stream = adapter.stream_turn(&logged_turn()).await.unwrap();
        drain(stream).await;

        let lines = log_lines(dir.path());
        assert_eq!(lines[0]["type"], "turn_start");
        assert_eq!(lines[0]["turn"]["model"], "scripted");
        let kinds: Vec<&str> = lines
            .iter()
            .filter(|l| l["type"] == "event")
            .map(|l| l["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["text_delta", "usage", "done"]);
        let end = lines.last().unwrap();
        assert_eq!(end["type"], "turn_end");
        assert_eq!(end["usage"]["input_tokens"], 5);
        assert!(end["total_ms"].is_u64());
    }

    #[tokio::test]
    async fn event_lines_carry_latency() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LoggingAdapter::new(
            Arc::new(ScriptedAdapter::always_text("hi")),
            dir.path(),
        );
        drain(adapter.stream_turn(&logged_turn()).await.unwrap()).await;
        let lines = log_lines(dir.path());
        for line in lines.iter().filter(|l| l["type"] == "event") {
            assert!(line["latency_ms"].is_u64());
        }
    }

    #[tokio::test]
    async fn redaction_truncates_instructions_and_hides_agents() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LoggingAdapter::new(
            Arc::new(ScriptedAdapter::always_text("hi")),
            dir.path(),
        )
        .with_redaction(true);
        drain(adapter.stream_turn(&logged_turn()).await.unwrap()).await;

        let lines = log_lines(dir.path());
        let turn = &lines[0]["turn"];
        assert_eq!(turn["instructions"], "This is a long instr");
        assert_eq!(turn["user_context"]["agents_doc"]["content"], "[REDACTED]");
        // The rest of the turn is untouched.
        assert_eq!(turn["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn without_redaction_turn_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LoggingAdapter::new(
            Arc::new(ScriptedAdapter::always_text("hi")),
            dir.path(),
        );
        drain(adapter.stream_turn(&logged_turn()).await.unwrap()).await;
        let lines = log_lines(dir.path());
        assert_eq!(
            lines[0]["turn"]["user_context"]["agents_doc"]["content"],
            "private project notes"
        );
    }

    #[tokio::test]
    async fn replay_round_trips_events() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LoggingAdapter::new(
            Arc::new(ScriptedAdapter::tool_then_text(
                "c1",
                "shell",
                r#"{"command":["ls"]}"#,
                "done",
            )),
            dir.path(),
        );
        drain(adapter.stream_turn(&logged_turn()).await.unwrap()).await;

        let mut paths: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        paths.sort();
        let events = replay(paths.last().unwrap()).unwrap();
        assert!(matches!(
            &events[0],
            EventKind::ToolCall { call_id, name, .. } if call_id == "c1" && name == "shell"
        ));
        assert_eq!(events.last(), Some(&EventKind::Done));
    }

    #[tokio::test]
    async fn replay_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turn.jsonl");
        fs::write(
            &path,
            "not json\n{\"type\":\"event\",\"event\":{\"type\":\"done\"}}\n",
        )
        .unwrap();
        let events = replay(&path).unwrap();
        assert_eq!(events, vec![EventKind::Done]);
    }

    #[tokio::test]
    async fn sequence_numbers_distinguish_same_second_turns() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LoggingAdapter::new(
            Arc::new(ScriptedAdapter::new(vec![
                vec![EventKind::Done],
                vec![EventKind::Done],
            ])),
            dir.path(),
        );
        drain(adapter.stream_turn(&logged_turn()).await.unwrap()).await;
        drain(adapter.stream_turn(&logged_turn()).await.unwrap()).await;
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 2, "each turn gets its own file");
    }
}
