use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;
use crate::level::RecordLevel;

/// A unit of conversational state. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub pointer: String,
    pub session_id: SessionId,
    pub session_key: Option<String>,
    pub level: RecordLevel,
    pub event_ts_ms: i64,
    pub token_count: u64,
    pub payload: Value,
    pub finalized_at_reset: bool,
    pub created_at_ms: i64,
}

impl Record {
    /// Decode the summary frontmatter. `None` for turns or foreign payloads.
    pub fn summary_payload(&self) -> Option<SummaryPayload> {
        if !self.level.is_summary() {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Text handed to the summarizer when this record is a rollup source.
    pub fn source_text(&self) -> String {
        if let Some(summary) = self.summary_payload() {
            return summary.summary;
        }
        match self.payload.get("content") {
            Some(content) => stringify_content(content),
            None => stringify_content(&self.payload),
        }
    }

    /// Role of a turn payload; summaries read as assistant-authored.
    pub fn role(&self) -> &str {
        self.payload
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("assistant")
    }

    /// Render the record as it is placed into the assembled context.
    pub fn render_for_context(&self) -> String {
        match self.summary_payload() {
            Some(summary) => summary.render(),
            None => format!("{}: {}", self.role(), self.source_text()),
        }
    }
}

/// Input for writing one record.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecord {
    pub pointer: String,
    pub session_id: SessionId,
    pub session_key: Option<String>,
    pub level: RecordLevel,
    pub event_ts_ms: i64,
    pub token_count: u64,
    pub payload: Value,
    pub finalized_at_reset: bool,
}

/// Membership of a record in the assembled context at its level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLaneEntry {
    pub session_id: SessionId,
    pub session_key: Option<String>,
    pub level: RecordLevel,
    pub pointer: String,
    pub is_active: bool,
    pub last_event_ts_ms: i64,
    pub updated_at_ms: i64,
}

/// Input for one lane row write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneUpsert {
    pub session_id: SessionId,
    pub session_key: Option<String>,
    pub level: RecordLevel,
    pub pointer: String,
    pub is_active: bool,
    pub last_event_ts_ms: i64,
}

/// Direct parent → child link written alongside a summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub parent_pointer: String,
    pub child_pointer: String,
    pub child_index: u32,
    pub child_level: RecordLevel,
    pub created_at_ms: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatesCovered {
    pub start_epoch_ms: i64,
    pub end_epoch_ms: i64,
}

impl DatesCovered {
    /// Span of the given event timestamps. `None` when empty.
    pub fn spanning(timestamps: impl IntoIterator<Item = i64>) -> Option<Self> {
        let mut iter = timestamps.into_iter();
        let first = iter.next()?;
        let (start, end) = iter.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
        Some(Self {
            start_epoch_ms: start,
            end_epoch_ms: end,
        })
    }
}

/// Which summarization prompt family produced a summary.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryMode {
    #[serde(rename = "leaf")]
    Leaf,
    #[serde(rename = "bindle")]
    Bindle,
    #[serde(rename = "reset-short-bindle")]
    ResetShortBindle,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leaf => "leaf",
            Self::Bindle => "bindle",
            Self::ResetShortBindle => "reset-short-bindle",
        }
    }

    /// Level a summary of this mode is written at.
    pub fn target_level(&self) -> RecordLevel {
        match self {
            Self::Leaf => RecordLevel::Leaf,
            Self::Bindle | Self::ResetShortBindle => RecordLevel::Bindle,
        }
    }

    /// Normal (non-reset) mode for a target level.
    pub fn for_level(level: RecordLevel) -> Option<Self> {
        match level {
            RecordLevel::Turn => None,
            RecordLevel::Leaf => Some(Self::Leaf),
            RecordLevel::Bindle => Some(Self::Bindle),
        }
    }
}

impl std::fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub provider: String,
    pub model_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFrontmatter {
    pub summary_type: SummaryMode,
    pub dates_covered: DatesCovered,
    pub children: Vec<String>,
    pub finalized_at_reset: bool,
}

/// Stored payload of a leaf or bindle record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryPayload {
    pub frontmatter: SummaryFrontmatter,
    pub summary: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub model_selection: ModelSelection,
}

impl SummaryPayload {
    /// Frontmatter block followed by the summary body.
    pub fn render(&self) -> String {
        let fm = &self.frontmatter;
        format!(
            "---\nsummaryType: {}\ndatesCovered: {}..{}\nchildren: {}\nfinalizedAtReset: {}\n---\n{}",
            fm.summary_type,
            fm.dates_covered.start_epoch_ms,
            fm.dates_covered.end_epoch_ms,
            fm.children.join(", "),
            fm.finalized_at_reset,
            self.summary.trim()
        )
    }
}

/// Flatten message content (string, or array of text blocks) into plain text.
pub fn stringify_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            let joined = joined.trim();
            if joined.is_empty() {
                value.to_string()
            } else {
                joined.to_string()
            }
        }
        other => other.to_string(),
    }
}
