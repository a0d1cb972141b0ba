#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use dolt_core::{LanePolicy, ModelSelection, RecordLevel, SessionId};
use dolt_engine::{
    ContextEngine, EngineConfig, ExtractiveSummarizer, SummarizeParams, SummarizeResult, Summarizer,
    SummarizerError, TurnInput,
};
use dolt_store::DoltStore;
use dolt_telemetry::{EventCollector, TelemetryBus};

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

/// Small lanes so a handful of turns exercise every level.
pub fn small_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.lanes.turn = LanePolicy::new(1_000, 100, 500);
    config.lanes.leaf = LanePolicy::new(600, 60, 300);
    config.lanes.bindle = LanePolicy::new(10_000, 1_000, 9_000);
    config.compaction.fresh_tail_min_turns = 2;
    config.compaction.fresh_tail_token_limit = 400;
    config.compaction.min_chunk_turns = 2;
    config
}

pub fn engine(store: DoltStore, config: EngineConfig, summarizer: Arc<dyn Summarizer>) -> (ContextEngine, EventCollector) {
    let bus = TelemetryBus::new();
    let collector = EventCollector::attach(&bus);
    let engine = ContextEngine::new(store, bus, summarizer, config).unwrap();
    (engine, collector)
}

pub fn extractive_engine(config: EngineConfig) -> (ContextEngine, EventCollector) {
    engine(
        DoltStore::in_memory().unwrap(),
        config,
        Arc::new(ExtractiveSummarizer::new()),
    )
}

pub fn turn(sid: &SessionId, i: usize, tokens: u64) -> TurnInput {
    TurnInput {
        session_id: sid.clone(),
        session_key: Some("agent:main".into()),
        message_id: i.to_string(),
        event_ts_ms: (i as i64 + 1) * 1_000,
        token_count: Some(tokens),
        payload: json!({
            "role": if i % 2 == 0 { "user" } else { "assistant" },
            "content": format!("message number {i}"),
        }),
    }
}

/// Turn pointers reachable from `pointer` through lineage.
pub fn descendant_turns(store: &DoltStore, pointer: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut stack = vec![pointer.to_string()];
    while let Some(current) = stack.pop() {
        for child in store.list_direct_child_records(&current).unwrap() {
            if child.level == RecordLevel::Turn {
                out.insert(child.pointer);
            } else {
                stack.push(child.pointer);
            }
        }
    }
    out
}

pub fn active_pointers(store: &DoltStore, sid: &SessionId, level: RecordLevel) -> Vec<String> {
    store
        .list_active_records(sid, level)
        .unwrap()
        .into_iter()
        .map(|r| r.pointer)
        .collect()
}
