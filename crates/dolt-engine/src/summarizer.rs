//! Summarizer seam for rollups.
//!
//! The engine only depends on the [`Summarizer`] trait. Model-backed
//! implementations live with the host; [`ExtractiveSummarizer`] is a
//! deterministic fallback that needs no model.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dolt_core::{DatesCovered, ModelSelection, Record, SummaryMode};

/// One record handed to the summarizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarySource {
    pub pointer: String,
    pub role: String,
    pub content: String,
    pub timestamp_ms: i64,
}

impl SummarySource {
    pub fn from_record(record: &Record) -> Self {
        Self {
            pointer: record.pointer.clone(),
            role: record.role().to_string(),
            content: record.source_text(),
            timestamp_ms: record.event_ts_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeParams {
    pub mode: SummaryMode,
    pub child_pointers: Vec<String>,
    pub dates_covered: DatesCovered,
    pub sources: Vec<SummarySource>,
    pub finalized_at_reset: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeResult {
    pub summary: String,
    #[serde(default)]
    pub metadata: Value,
    pub model_selection: ModelSelection,
}

/// Produces the summary text for a rollup. The only await point of a rollup.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, params: &SummarizeParams) -> Result<SummarizeResult, SummarizerError>;
}

/// Errors that can occur during summarization.
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    /// The model call timed out.
    #[error("summarizer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The model returned unparseable output.
    #[error("failed to parse summarizer response: {reason}")]
    ParseError { reason: String },

    /// The model call failed.
    #[error("summarizer call failed: {message}")]
    CallFailed { message: String },
}

const DEFAULT_LINE_LIMIT: usize = 200;

/// Model-free summarizer: a header line plus one truncated line per source.
pub struct ExtractiveSummarizer {
    line_limit: usize,
}

impl ExtractiveSummarizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            line_limit: DEFAULT_LINE_LIMIT,
        }
    }

    /// Cap each source line at `line_limit` characters.
    #[must_use]
    pub fn with_line_limit(line_limit: usize) -> Self {
        Self {
            line_limit: line_limit.max(4),
        }
    }

    fn render(&self, params: &SummarizeParams) -> String {
        let mut out = format!(
            "[{}] {} source(s), {}..{}",
            params.mode,
            params.sources.len(),
            params.dates_covered.start_epoch_ms,
            params.dates_covered.end_epoch_ms,
        );
        if params.finalized_at_reset {
            out.push_str(" (finalized at reset)");
        }
        for source in &params.sources {
            let line = collapse_whitespace(&source.content);
            out.push_str(&format!(
                "\n- {}: {}",
                source.role,
                truncate(&line, self.line_limit)
            ));
        }
        out
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, params: &SummarizeParams) -> Result<SummarizeResult, SummarizerError> {
        Ok(SummarizeResult {
            summary: self.render(params),
            metadata: json!({
                "extractive": true,
                "sourceCount": params.sources.len(),
            }),
            model_selection: ModelSelection {
                provider: "dolt".into(),
                model_id: "extractive".into(),
            },
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters, ending in `...` when cut.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let cut: String = text.chars().take(keep).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: SummaryMode, contents: &[&str]) -> SummarizeParams {
        SummarizeParams {
            mode,
            child_pointers: (0..contents.len()).map(|i| format!("turn:s1:msg:{i}")).collect(),
            dates_covered: DatesCovered {
                start_epoch_ms: 100,
                end_epoch_ms: 200,
            },
            sources: contents
                .iter()
                .enumerate()
                .map(|(i, c)| SummarySource {
                    pointer: format!("turn:s1:msg:{i}"),
                    role: if i % 2 == 0 { "user".into() } else { "assistant".into() },
                    content: (*c).to_string(),
                    timestamp_ms: 100 + i as i64,
                })
                .collect(),
            finalized_at_reset: false,
        }
    }

    #[tokio::test]
    async fn extractive_renders_header_and_lines() {
        let result = ExtractiveSummarizer::new()
            .summarize(&params(SummaryMode::Leaf, &["fix the parser", "done, tests pass"]))
            .await
            .unwrap();
        let lines: Vec<&str> = result.summary.lines().collect();
        assert_eq!(lines[0], "[leaf] 2 source(s), 100..200");
        assert_eq!(lines[1], "- user: fix the parser");
        assert_eq!(lines[2], "- assistant: done, tests pass");
        assert_eq!(result.model_selection.model_id, "extractive");
        assert_eq!(result.metadata["sourceCount"], 2);
    }

    #[tokio::test]
    async fn extractive_marks_reset_and_truncates() {
        let long = "word ".repeat(100);
        let mut p = params(SummaryMode::ResetShortBindle, &[long.as_str()]);
        p.finalized_at_reset = true;
        let result = ExtractiveSummarizer::with_line_limit(20)
            .summarize(&p)
            .await
            .unwrap();
        assert!(result.summary.starts_with("[reset-short-bindle] 1 source(s)"));
        assert!(result.summary.contains("(finalized at reset)"));
        let line = result.summary.lines().nth(1).unwrap();
        assert_eq!(line, "- user: word word word wo...");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
        let crabs = "🦀".repeat(10);
        let cut = truncate(&crabs, 5);
        assert_eq!(cut, "🦀🦀...");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace("a\n\n  b\tc "), "a b c");
    }
}
