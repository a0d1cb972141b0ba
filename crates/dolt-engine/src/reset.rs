//! Reset finalization: fold every active turn and leaf of a session into
//! bindles so the next session starts from summaries only.

use std::fmt::Display;
use std::future::Future;

use tracing::{info, warn};

use dolt_core::{LanePolicies, PerLevel, Record, RecordLevel, SessionId, SummaryMode};
use dolt_settings::ResetSettings;
use dolt_telemetry::events::{ResetFinalizationCompleted, TelemetryKind};
use dolt_telemetry::TelemetryEvent;

use crate::error::{EngineError, Result};
use crate::rollup::{RollupExecutor, RollupRequest};
use crate::selector::{emit_turn_chunk_selection, select_reset_chunk, TurnChunkParams};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResetResult {
    pub ingested_tail_count: u64,
    pub turn_to_leaf_rollups: u64,
    pub leaf_to_bindle_rollups: u64,
    pub turn_to_leaf_convergence_loops: u64,
    pub leaf_to_bindle_convergence_loops: u64,
    pub short_bindle_pointer: Option<String>,
    /// Records folded into the short bindle, oldest first.
    pub residual_turns: Vec<String>,
    pub residual_leaves: Vec<String>,
    /// Active pointers per level once finalization is done, oldest first.
    pub active_after: PerLevel<Vec<String>>,
}

impl ResetResult {
    pub fn short_bindle_created(&self) -> bool {
        self.short_bindle_pointer.is_some()
    }
}

#[derive(Clone)]
pub struct ResetFinalizer {
    executor: RollupExecutor,
    policies: LanePolicies,
    settings: ResetSettings,
}

impl ResetFinalizer {
    pub fn new(executor: RollupExecutor, policies: LanePolicies, settings: ResetSettings) -> Self {
        Self {
            executor,
            policies,
            settings,
        }
    }

    /// Run the ordered reset sequence: ingest the missing tail, converge
    /// turns into leaves, converge leaves into bindles, then fold whatever
    /// is left into one short bindle.
    pub async fn finalize<F, E>(
        &self,
        session_id: &SessionId,
        session_key: Option<&str>,
        ingest_missing_tail: F,
    ) -> Result<ResetResult>
    where
        F: Future<Output = std::result::Result<u64, E>>,
        E: Display,
    {
        let ingested_tail_count = ingest_missing_tail
            .await
            .map_err(|e| EngineError::Ingest(e.to_string()))?;

        let turn_floor = self.settings.min_turn_source_floor.max(1);
        let leaf_floor = self.settings.min_leaf_source_floor.max(1);
        let max_passes = self.settings.max_compaction_passes.max(1);
        let store = self.executor.store();

        let mut result = ResetResult {
            ingested_tail_count,
            ..Default::default()
        };

        // A pass limit only fails when a pass is still needed after it.
        let mut passes = 0u32;
        loop {
            result.turn_to_leaf_convergence_loops += 1;
            let turns = store.list_active_records(session_id, RecordLevel::Turn)?;
            if turns.is_empty() {
                break;
            }
            let lane_tokens = turns.iter().map(|t| t.token_count).sum();
            let params = TurnChunkParams::for_reset(lane_tokens, self.policies.turn, turn_floor);
            let selection = select_reset_chunk(&turns, self.policies.turn.target, turn_floor);
            emit_turn_chunk_selection(
                self.executor.bus(),
                session_id,
                session_key,
                turns.len(),
                &params,
                &selection,
            );
            if selection.is_empty() {
                break;
            }
            if passes == max_passes {
                return Err(EngineError::ConvergenceLimit {
                    lane: "turn->leaf",
                    passes: max_passes,
                });
            }
            self.executor
                .execute(request(session_id, session_key, selection.selected, SummaryMode::Leaf))
                .await?;
            passes += 1;
            result.turn_to_leaf_rollups += 1;
        }

        passes = 0;
        loop {
            result.leaf_to_bindle_convergence_loops += 1;
            let leaves = store.list_active_records(session_id, RecordLevel::Leaf)?;
            let chunk = select_reset_chunk(&leaves, self.policies.leaf.target, leaf_floor);
            if chunk.is_empty() {
                break;
            }
            if passes == max_passes {
                return Err(EngineError::ConvergenceLimit {
                    lane: "leaf->bindle",
                    passes: max_passes,
                });
            }
            self.executor
                .execute(request(session_id, session_key, chunk.selected, SummaryMode::Bindle))
                .await?;
            passes += 1;
            result.leaf_to_bindle_rollups += 1;
        }

        let residual_turns = store.list_active_records(session_id, RecordLevel::Turn)?;
        let residual_leaves = store.list_active_records(session_id, RecordLevel::Leaf)?;
        result.residual_turns = residual_turns.iter().map(|r| r.pointer.clone()).collect();
        result.residual_leaves = residual_leaves.iter().map(|r| r.pointer.clone()).collect();

        let mut residual: Vec<Record> = residual_leaves.into_iter().chain(residual_turns).collect();
        if !residual.is_empty() {
            residual.sort_by(|a, b| {
                a.event_ts_ms
                    .cmp(&b.event_ts_ms)
                    .then_with(|| a.pointer.cmp(&b.pointer))
            });
            let rollup = self
                .executor
                .execute(request(
                    session_id,
                    session_key,
                    residual,
                    SummaryMode::ResetShortBindle,
                ))
                .await?;
            result.short_bindle_pointer = Some(rollup.parent.pointer);
        }

        for level in RecordLevel::ALL {
            *result.active_after.get_mut(level) = store
                .list_active_records(session_id, level)?
                .into_iter()
                .map(|r| r.pointer)
                .collect();
        }
        if !result.active_after.turn.is_empty() || !result.active_after.leaf.is_empty() {
            warn!(session_id = %session_id, "reset finalization left active turns or leaves");
        }

        let lanes = store.lane_snapshot(session_id)?;
        self.executor.bus().emit(TelemetryEvent::new(
            session_id,
            session_key,
            TelemetryKind::ResetFinalizationCompleted(ResetFinalizationCompleted {
                ingested_tail_count,
                turn_to_leaf_rollups: result.turn_to_leaf_rollups,
                leaf_to_bindle_rollups: result.leaf_to_bindle_rollups,
                turn_to_leaf_convergence_loops: result.turn_to_leaf_convergence_loops,
                leaf_to_bindle_convergence_loops: result.leaf_to_bindle_convergence_loops,
                short_bindle_created: result.short_bindle_created(),
                short_bindle_created_count: u64::from(result.short_bindle_created()),
                residual_turn_count: result.residual_turns.len() as u64,
                residual_leaf_count: result.residual_leaves.len() as u64,
                lane_active_record_counts: lanes.active_counts,
                lane_active_token_totals: lanes.active_tokens,
            }),
        ));
        info!(
            session_id = %session_id,
            ingested = ingested_tail_count,
            leaf_rollups = result.turn_to_leaf_rollups,
            bindle_rollups = result.leaf_to_bindle_rollups,
            short_bindle = result.short_bindle_created(),
            "reset finalized"
        );
        Ok(result)
    }
}

fn request(
    session_id: &SessionId,
    session_key: Option<&str>,
    sources: Vec<Record>,
    mode: SummaryMode,
) -> RollupRequest {
    RollupRequest {
        session_id: session_id.clone(),
        session_key: session_key.map(str::to_owned),
        source_records: sources,
        target_level: mode.target_level(),
        mode,
        // Reset keeps every bindle it produces.
        bindle_eviction_target_tokens: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::ExtractiveSummarizer;
    use crate::test_support::{ingest_turns, seed_active, FailingSummarizer};
    use dolt_core::{LanePolicy, NewRecord};
    use dolt_store::DoltStore;
    use dolt_telemetry::{EventCollector, TelemetryBus};
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Arc;

    fn finalizer_with(
        store: &DoltStore,
        bus: &TelemetryBus,
        policies: LanePolicies,
        settings: ResetSettings,
    ) -> ResetFinalizer {
        let executor = RollupExecutor::new(store.clone(), bus.clone(), Arc::new(ExtractiveSummarizer::new()));
        ResetFinalizer::new(executor, policies, settings)
    }

    /// Turn chunks capped at 200 tokens: two 100-token turns per leaf.
    fn finalizer(store: &DoltStore, bus: &TelemetryBus, settings: ResetSettings) -> ResetFinalizer {
        let policies = LanePolicies {
            turn: LanePolicy::new(1_000, 100, 200),
            ..LanePolicies::default()
        };
        finalizer_with(store, bus, policies, settings)
    }

    async fn nothing_to_ingest() -> std::result::Result<u64, Infallible> {
        Ok(0)
    }

    #[tokio::test]
    async fn five_turns_end_as_bindles_only() {
        let store = DoltStore::in_memory().unwrap();
        let bus = TelemetryBus::new();
        let collector = EventCollector::attach(&bus);
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[100; 5]);

        let result = finalizer(&store, &bus, ResetSettings::default())
            .finalize(&sid, Some("agent:main"), nothing_to_ingest())
            .await
            .unwrap();

        // 5 turns -> leaves of 2 and 2, one residual turn.
        assert_eq!(result.turn_to_leaf_rollups, 2);
        assert_eq!(result.turn_to_leaf_convergence_loops, 3);
        assert_eq!(result.leaf_to_bindle_rollups, 1);
        assert_eq!(result.residual_turns.len(), 1);
        assert!(result.residual_leaves.is_empty());
        assert!(result.short_bindle_created());
        assert!(result.active_after.turn.is_empty());
        assert!(result.active_after.leaf.is_empty());
        assert_eq!(result.active_after.bindle.len(), 2);

        let short = store
            .require_record(result.short_bindle_pointer.as_deref().unwrap())
            .unwrap();
        assert!(short.finalized_at_reset);
        assert!(short.pointer.starts_with("bindle:s1:reset:"));
        assert_eq!(short.summary_payload().unwrap().frontmatter.summary_type, SummaryMode::ResetShortBindle);

        assert_eq!(collector.of_type("dolt_reset_summary_quality").len(), 1);
        let done = collector.of_type("dolt_reset_finalization_completed");
        match &done[0].kind {
            TelemetryKind::ResetFinalizationCompleted(p) => {
                assert!(p.short_bindle_created);
                assert_eq!(p.short_bindle_created_count, 1);
                assert_eq!(p.residual_turn_count, 1);
                assert_eq!(p.lane_active_record_counts.bindle, 2);
                assert_eq!(p.lane_active_record_counts.turn, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ingests_tail_before_compacting() {
        let store = DoltStore::in_memory().unwrap();
        let bus = TelemetryBus::new();
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[100; 2]);

        let tail_store = store.clone();
        let tail_sid = sid.clone();
        let result = finalizer(&store, &bus, ResetSettings::default())
            .finalize(&sid, None, async move {
                tail_store
                    .upsert_active_record(&NewRecord {
                        pointer: "turn:s1:msg:tail".into(),
                        session_id: tail_sid,
                        session_key: None,
                        level: RecordLevel::Turn,
                        event_ts_ms: 100,
                        token_count: 50,
                        payload: json!({"role": "user", "content": "last words"}),
                        finalized_at_reset: false,
                    })
                    .map(|_| 1u64)
            })
            .await
            .unwrap();

        assert_eq!(result.ingested_tail_count, 1);
        assert_eq!(result.turn_to_leaf_rollups, 1);
        assert_eq!(result.leaf_to_bindle_rollups, 0);
        // One leaf and the tail turn are folded into the short bindle.
        assert_eq!(result.residual_leaves.len(), 1);
        assert_eq!(result.residual_turns, vec!["turn:s1:msg:tail".to_string()]);
        assert!(result.short_bindle_created());

        let children = store
            .list_direct_children(result.short_bindle_pointer.as_deref().unwrap())
            .unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].child_level, RecordLevel::Leaf);
        assert_eq!(children[1].child_pointer, "turn:s1:msg:tail");
    }

    #[tokio::test]
    async fn ingest_failure_is_reported() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        let err = finalizer(&store, &TelemetryBus::new(), ResetSettings::default())
            .finalize(&sid, None, async { Err::<u64, _>("transcript unreadable") })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ingest(msg) if msg == "transcript unreadable"));
    }

    #[tokio::test]
    async fn empty_session_finalizes_to_nothing() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        let result = finalizer(&store, &TelemetryBus::new(), ResetSettings::default())
            .finalize(&sid, None, nothing_to_ingest())
            .await
            .unwrap();
        assert!(!result.short_bindle_created());
        assert_eq!(result.turn_to_leaf_convergence_loops, 1);
        assert_eq!(result.active_after, PerLevel::default());
    }

    #[tokio::test]
    async fn pass_limit_is_an_error() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[100; 8]);
        let settings = ResetSettings {
            max_compaction_passes: 2,
            ..Default::default()
        };
        let err = finalizer(&store, &TelemetryBus::new(), settings)
            .finalize(&sid, None, nothing_to_ingest())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConvergenceLimit { lane: "turn->leaf", passes: 2 }));
    }

    #[tokio::test]
    async fn converging_on_the_last_allowed_pass_succeeds() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[100; 4]);
        let settings = ResetSettings {
            max_compaction_passes: 2,
            ..Default::default()
        };
        let result = finalizer(&store, &TelemetryBus::new(), settings)
            .finalize(&sid, None, nothing_to_ingest())
            .await
            .unwrap();
        assert_eq!(result.turn_to_leaf_rollups, 2);
        assert_eq!(result.leaf_to_bindle_rollups, 1);
        assert!(result.active_after.turn.is_empty());
        assert!(result.active_after.leaf.is_empty());
        assert_eq!(result.active_after.bindle.len(), 1);
    }

    #[tokio::test]
    async fn long_session_under_target_converges_with_defaults() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        let turns = ingest_turns(&store, &sid, &[50; 600]);

        let result = finalizer_with(&store, &TelemetryBus::new(), LanePolicies::default(), ResetSettings::default())
            .finalize(&sid, None, nothing_to_ingest())
            .await
            .unwrap();

        assert_eq!(result.turn_to_leaf_rollups, 1);
        assert!(result.active_after.turn.is_empty());
        assert!(result.active_after.leaf.is_empty());
        assert_eq!(result.active_after.bindle.len(), 1);
        for turn in &turns {
            assert!(!store.is_active(&sid, RecordLevel::Turn, &turn.pointer).unwrap());
            assert!(!store.list_parents(&turn.pointer).unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn many_leaves_fold_in_capped_chunks() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        let specs: Vec<(i64, u64)> = (0..300).map(|i| (i + 1, 100)).collect();
        seed_active(&store, &sid, RecordLevel::Leaf, &specs);

        let result = finalizer_with(&store, &TelemetryBus::new(), LanePolicies::default(), ResetSettings::default())
            .finalize(&sid, None, nothing_to_ingest())
            .await
            .unwrap();

        // 30k leaf tokens against an 18k cap: two bindles.
        assert_eq!(result.leaf_to_bindle_rollups, 2);
        assert!(result.active_after.leaf.is_empty());
        assert!(!result.short_bindle_created());
    }

    #[tokio::test]
    async fn summarizer_failure_stops_finalization() {
        let store = DoltStore::in_memory().unwrap();
        let bus = TelemetryBus::new();
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[100; 3]);
        let executor = RollupExecutor::new(store.clone(), bus.clone(), Arc::new(FailingSummarizer));
        let err = ResetFinalizer::new(executor, LanePolicies::default(), ResetSettings::default())
            .finalize(&sid, None, nothing_to_ingest())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Summarizer(_)));
        assert_eq!(store.list_active_records(&sid, RecordLevel::Turn).unwrap().len(), 3);
    }
}
