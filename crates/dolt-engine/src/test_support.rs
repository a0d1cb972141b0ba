use std::time::Duration;

use serde_json::json;

use dolt_core::ids::turn_pointer;
use dolt_core::{
    DatesCovered, ModelSelection, NewRecord, Record, RecordLevel, SessionId, SummaryFrontmatter,
    SummaryMode, SummaryPayload,
};
use dolt_store::DoltStore;

use crate::summarizer::{SummarizeParams, SummarizeResult, Summarizer, SummarizerError};

pub struct FailingSummarizer;

#[async_trait::async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _params: &SummarizeParams) -> Result<SummarizeResult, SummarizerError> {
        Err(SummarizerError::CallFailed {
            message: "model unavailable".into(),
        })
    }
}

pub struct SlowSummarizer(pub Duration);

#[async_trait::async_trait]
impl Summarizer for SlowSummarizer {
    async fn summarize(&self, _params: &SummarizeParams) -> Result<SummarizeResult, SummarizerError> {
        tokio::time::sleep(self.0).await;
        Ok(SummarizeResult {
            summary: "late".into(),
            metadata: serde_json::Value::Null,
            model_selection: ModelSelection::default(),
        })
    }
}

/// Turn `i` lands at `event_ts_ms = (i + 1) * 10`.
pub fn ingest_turns(store: &DoltStore, sid: &SessionId, tokens: &[u64]) -> Vec<Record> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, &token_count)| {
            store
                .upsert_active_record(&NewRecord {
                    pointer: turn_pointer(sid, &i.to_string()),
                    session_id: sid.clone(),
                    session_key: None,
                    level: RecordLevel::Turn,
                    event_ts_ms: (i as i64 + 1) * 10,
                    token_count,
                    payload: json!({
                        "role": if i % 2 == 0 { "user" } else { "assistant" },
                        "content": format!("message {i}"),
                    }),
                    finalized_at_reset: false,
                })
                .unwrap()
                .record
        })
        .collect()
}

/// Active summary records at `level`, one per `(event_ts_ms, token_count)`.
pub fn seed_active(
    store: &DoltStore,
    sid: &SessionId,
    level: RecordLevel,
    specs: &[(i64, u64)],
) -> Vec<Record> {
    let mode = SummaryMode::for_level(level).unwrap();
    specs
        .iter()
        .map(|&(ts, token_count)| {
            let payload = SummaryPayload {
                frontmatter: SummaryFrontmatter {
                    summary_type: mode,
                    dates_covered: DatesCovered {
                        start_epoch_ms: ts,
                        end_epoch_ms: ts,
                    },
                    children: Vec::new(),
                    finalized_at_reset: false,
                },
                summary: format!("{level} summary at {ts}"),
                metadata: serde_json::Value::Null,
                model_selection: ModelSelection::default(),
            };
            store
                .upsert_active_record(&NewRecord {
                    pointer: format!("{level}:{sid}:seed:{ts}"),
                    session_id: sid.clone(),
                    session_key: None,
                    level,
                    event_ts_ms: ts,
                    token_count,
                    payload: serde_json::to_value(&payload).unwrap(),
                    finalized_at_reset: false,
                })
                .unwrap()
                .record
        })
        .collect()
}
