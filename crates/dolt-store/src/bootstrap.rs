//! Seed an empty session's turn lane from prior history or a JSONL
//! transcript.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use dolt_core::tokens::{estimate_text_tokens, token_count_from_usage};
use dolt_core::{ids, record::stringify_content, SessionId};

use crate::error::StoreError;

/// One turn supplied by the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    #[serde(default)]
    pub pointer: Option<String>,
    #[serde(default)]
    pub event_ts_ms: Option<i64>,
    #[serde(default)]
    pub token_count: Option<u64>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BootstrapSource {
    History(Vec<HistoryTurn>),
    Jsonl(PathBuf),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapRequest {
    pub session_id: SessionId,
    pub session_key: Option<String>,
    pub source: BootstrapSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOrigin {
    History,
    Jsonl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapSkipReason {
    SessionNotEmpty,
    SessionFileMissing,
    NoTurnsFound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub bootstrapped: bool,
    pub imported_records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BootstrapSkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<BootstrapOrigin>,
}

impl BootstrapResult {
    pub(crate) fn skipped(reason: BootstrapSkipReason) -> Self {
        Self {
            bootstrapped: false,
            imported_records: 0,
            reason: Some(reason),
            source: None,
        }
    }
}

/// A turn ready to be written, with its final pointer.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PreparedTurn {
    pub pointer: String,
    pub event_ts_ms: i64,
    pub token_count: u64,
    pub payload: Value,
}

/// Resolve the source into turns. `Err(reason)` when there is nothing to import.
pub(crate) fn load_turns(
    session_id: &SessionId,
    source: &BootstrapSource,
) -> Result<Result<(BootstrapOrigin, Vec<PreparedTurn>), BootstrapSkipReason>, StoreError> {
    let (origin, raw) = match source {
        BootstrapSource::History(turns) => (BootstrapOrigin::History, turns.clone()),
        BootstrapSource::Jsonl(path) => {
            if !path.exists() {
                return Ok(Err(BootstrapSkipReason::SessionFileMissing));
            }
            (BootstrapOrigin::Jsonl, read_jsonl_turns(path, session_id)?)
        }
    };
    if raw.is_empty() {
        return Ok(Err(BootstrapSkipReason::NoTurnsFound));
    }
    Ok(Ok((origin, prepare(session_id, raw))))
}

fn prepare(session_id: &SessionId, turns: Vec<HistoryTurn>) -> Vec<PreparedTurn> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    turns
        .into_iter()
        .enumerate()
        .map(|(idx, turn)| {
            let position = idx + 1;
            let base = turn
                .pointer
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| ids::bootstrap_turn_pointer(session_id, position));
            let token_count = turn
                .token_count
                .unwrap_or_else(|| estimate_payload_tokens(&turn.payload));
            PreparedTurn {
                pointer: dedupe_pointer(base, &mut seen),
                event_ts_ms: turn.event_ts_ms.map_or(position as i64, |ts| ts.max(0)),
                token_count,
                payload: turn.payload,
            }
        })
        .collect()
}

fn estimate_payload_tokens(payload: &Value) -> u64 {
    if let Some(tokens) = payload.get("usage").and_then(token_count_from_usage) {
        return tokens;
    }
    match payload.get("content") {
        Some(content) => estimate_text_tokens(&stringify_content(content)),
        None => 0,
    }
}

fn dedupe_pointer(pointer: String, seen: &mut HashMap<String, u32>) -> String {
    let count = seen.entry(pointer.clone()).or_insert(0);
    let current = *count;
    *count += 1;
    if current == 0 {
        pointer
    } else {
        format!("{pointer}:dup:{current}")
    }
}

fn read_jsonl_turns(path: &Path, session_id: &SessionId) -> Result<Vec<HistoryTurn>, StoreError> {
    let contents = std::fs::read_to_string(path)?;
    let file = path.display().to_string();
    let mut turns = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: Value = match serde_json::from_str(trimmed) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => continue,
            Err(e) => {
                debug!(file = %file, line = line_number, error = %e, "skipping unparsable transcript line");
                continue;
            }
        };
        if let Some(turn) = parse_message_entry(&entry, session_id, &file, line_number) {
            turns.push(turn);
        }
    }
    Ok(turns)
}

fn parse_message_entry(
    entry: &Value,
    session_id: &SessionId,
    file: &str,
    line_number: usize,
) -> Option<HistoryTurn> {
    if entry.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    let message = entry.get("message").filter(|m| m.is_object())?;
    let role = message.get("role").and_then(Value::as_str)?;
    if role != "user" && role != "assistant" {
        return None;
    }

    let id = non_empty_str(entry.get("id"));
    let parent_id = non_empty_str(entry.get("parentId"));
    let usage = message
        .get("usage")
        .or_else(|| entry.get("usage"))
        .cloned()
        .unwrap_or(Value::Null);
    let content = message.get("content").cloned().unwrap_or(Value::Null);

    let event_ts_ms = entry
        .get("timestamp")
        .and_then(parse_timestamp_ms)
        .or_else(|| message.get("timestamp").and_then(parse_timestamp_ms))
        .unwrap_or(line_number as i64);
    let token_count = token_count_from_usage(&usage)
        .unwrap_or_else(|| estimate_text_tokens(&stringify_content(&content)));

    Some(HistoryTurn {
        pointer: id.map(|id| ids::turn_pointer(session_id, id)),
        event_ts_ms: Some(event_ts_ms),
        token_count: Some(token_count),
        payload: json!({
            "role": role,
            "content": content,
            "usage": usage,
            "source": {
                "file": file,
                "line": line_number,
                "entryId": id,
                "parentId": parent_id,
            },
        }),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Epoch millis from a number or an RFC 3339 string.
fn parse_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0).floor() as i64),
        Value::String(s) if !s.trim().is_empty() => chrono::DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}
