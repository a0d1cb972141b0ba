//! Session-facing facade: ingest turns, compact under pressure, hydrate at
//! session start and finalize at reset.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use dolt_core::ids::turn_pointer;
use dolt_core::record::stringify_content;
use dolt_core::tokens::{estimate_text_tokens, token_count_from_usage};
use dolt_core::{LanePolicies, NewRecord, Record, RecordLevel, SessionId, SummaryMode};
use dolt_settings::{CompactionSettings, DoltSettings, HydrationSettings, ResetSettings};
use dolt_store::{BootstrapRequest, BootstrapResult, DoltStore, UpsertOutcome};
use dolt_telemetry::TelemetryBus;

use crate::error::Result;
use crate::hydrate::{AssemblySnapshot, BootstrapHydrator};
use crate::policy::{
    emit_lane_pressure_decision, evaluate_lane_pressure, resolve_lane_policies,
    LanePolicyOverrides, PressureDecision,
};
use crate::reset::{ResetFinalizer, ResetResult};
use crate::rollup::{RollupExecutor, RollupRequest, RollupResult};
use crate::selector::{emit_turn_chunk_selection, select_turn_chunk, TurnChunkParams};
use crate::summarizer::Summarizer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub lanes: LanePolicies,
    pub compaction: CompactionSettings,
    pub reset: ResetSettings,
    pub hydration: HydrationSettings,
}

impl EngineConfig {
    pub fn from_settings(settings: &DoltSettings) -> Self {
        Self {
            lanes: settings.lanes,
            compaction: settings.compaction.clone(),
            reset: settings.reset.clone(),
            hydration: settings.hydration.clone(),
        }
    }

    /// Replace the lane policies with defaults plus `overrides`.
    pub fn with_lane_overrides(mut self, overrides: &LanePolicyOverrides) -> Result<Self> {
        self.lanes = resolve_lane_policies(overrides)?;
        Ok(self)
    }

    pub fn bindle_eviction_target_tokens(&self) -> u64 {
        self.compaction
            .bindle_eviction_target_tokens
            .unwrap_or(self.lanes.bindle.target)
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_millis(self.compaction.summarize_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&DoltSettings::default())
    }
}

/// A conversation turn to record.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnInput {
    pub session_id: SessionId,
    pub session_key: Option<String>,
    pub message_id: String,
    pub event_ts_ms: i64,
    /// Measured size. Estimated from `usage` or the text when absent.
    pub token_count: Option<u64>,
    /// `{"role", "content", "usage"?}` as the host recorded it.
    pub payload: Value,
}

impl TurnInput {
    /// The turn record this input is stored as.
    pub fn to_record(&self) -> NewRecord {
        NewRecord {
            pointer: turn_pointer(&self.session_id, &self.message_id),
            session_id: self.session_id.clone(),
            session_key: self.session_key.clone(),
            level: RecordLevel::Turn,
            event_ts_ms: self.event_ts_ms,
            token_count: self.token_count(),
            payload: self.payload.clone(),
            finalized_at_reset: false,
        }
    }

    fn token_count(&self) -> u64 {
        if let Some(count) = self.token_count {
            return count;
        }
        if let Some(count) = self.payload.get("usage").and_then(token_count_from_usage) {
            return count;
        }
        let text = match self.payload.get("content") {
            Some(content) => stringify_content(content),
            None => stringify_content(&self.payload),
        };
        estimate_text_tokens(&text)
    }
}

#[derive(Clone, Debug)]
pub struct CompactionOutcome {
    pub turn_decision: PressureDecision,
    pub leaf_rollup: Option<RollupResult>,
    pub leaf_decision: PressureDecision,
    pub bindle_rollup: Option<RollupResult>,
}

impl CompactionOutcome {
    pub fn rolled_up(&self) -> bool {
        self.leaf_rollup.is_some() || self.bindle_rollup.is_some()
    }
}

/// Owns the store, telemetry bus and summarizer. Writes for one session are
/// serialized; different sessions proceed in parallel. Cheap to clone.
#[derive(Clone)]
pub struct ContextEngine {
    store: DoltStore,
    bus: TelemetryBus,
    config: EngineConfig,
    executor: RollupExecutor,
    hydrator: BootstrapHydrator,
    finalizer: ResetFinalizer,
    session_locks: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,
}

impl ContextEngine {
    pub fn new(
        store: DoltStore,
        bus: TelemetryBus,
        summarizer: Arc<dyn Summarizer>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.lanes.validate()?;
        let executor = RollupExecutor::new(store.clone(), bus.clone(), summarizer)
            .with_summarize_timeout(config.summarize_timeout());
        let hydrator = BootstrapHydrator::new(store.clone(), bus.clone());
        let finalizer = ResetFinalizer::new(executor.clone(), config.lanes, config.reset.clone());
        Ok(Self {
            store,
            bus,
            config,
            executor,
            hydrator,
            finalizer,
            session_locks: Arc::new(DashMap::new()),
        })
    }

    pub fn store(&self) -> &DoltStore {
        &self.store
    }

    pub fn bus(&self) -> &TelemetryBus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn lock_session(&self, session_id: &SessionId) -> SessionGuard {
        let lock = self.session_locks.entry(session_id.clone()).or_default().clone();
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.session_locks),
            session_id: session_id.clone(),
        }
    }

    pub async fn ingest_turn(&self, input: TurnInput) -> Result<UpsertOutcome> {
        let _guard = self.lock_session(&input.session_id).await;
        let outcome = self.store.upsert_active_record(&input.to_record())?;
        debug!(
            session_id = %input.session_id,
            pointer = %outcome.record.pointer,
            created = outcome.created,
            "turn ingested"
        );
        Ok(outcome)
    }

    pub fn lane_token_count(&self, session_id: &SessionId, level: RecordLevel) -> Result<u64> {
        Ok(self.store.active_token_count(session_id, level)?)
    }

    /// Roll turns into a leaf when the turn lane is under pressure, then
    /// leaves into a bindle when the leaf lane is.
    pub async fn compact_if_needed(
        &self,
        session_id: &SessionId,
        session_key: Option<&str>,
        hard_limit_safety_mode: bool,
    ) -> Result<CompactionOutcome> {
        let _guard = self.lock_session(session_id).await;

        let turns = self.store.list_active_records(session_id, RecordLevel::Turn)?;
        let turn_tokens: u64 = turns.iter().map(|r| r.token_count).sum();
        let turn_decision =
            evaluate_lane_pressure(turn_tokens, &self.config.lanes.turn, hard_limit_safety_mode);
        emit_lane_pressure_decision(&self.bus, session_id, session_key, RecordLevel::Turn, &turn_decision);

        let mut leaf_rollup = None;
        if turn_decision.is_triggered() {
            let compaction = &self.config.compaction;
            let params = TurnChunkParams {
                lane_token_count: turn_tokens,
                policy: self.config.lanes.turn,
                fresh_tail_min_turns: compaction.fresh_tail_min_turns,
                fresh_tail_token_limit: compaction.fresh_tail_token_limit,
                min_chunk_turns: compaction.min_chunk_turns,
            };
            let selection = select_turn_chunk(&turns, &params);
            emit_turn_chunk_selection(&self.bus, session_id, session_key, turns.len(), &params, &selection);
            if !selection.is_empty() {
                let rollup = self
                    .executor
                    .execute(RollupRequest {
                        session_id: session_id.clone(),
                        session_key: session_key.map(str::to_owned),
                        source_records: selection.selected,
                        target_level: RecordLevel::Leaf,
                        mode: SummaryMode::Leaf,
                        bindle_eviction_target_tokens: None,
                    })
                    .await?;
                leaf_rollup = Some(rollup);
            }
        }

        let leaves = self.store.list_active_records(session_id, RecordLevel::Leaf)?;
        let leaf_tokens: u64 = leaves.iter().map(|r| r.token_count).sum();
        let leaf_decision = evaluate_lane_pressure(leaf_tokens, &self.config.lanes.leaf, false);
        emit_lane_pressure_decision(&self.bus, session_id, session_key, RecordLevel::Leaf, &leaf_decision);

        let mut bindle_rollup = None;
        if leaf_decision.is_triggered() {
            let sources = oldest_leaves_to_target(
                leaves,
                leaf_tokens,
                self.config.lanes.leaf.target,
                self.config.compaction.leaf_rollup_min_leaves,
            );
            if !sources.is_empty() {
                let rollup = self
                    .executor
                    .execute(RollupRequest {
                        session_id: session_id.clone(),
                        session_key: session_key.map(str::to_owned),
                        source_records: sources,
                        target_level: RecordLevel::Bindle,
                        mode: SummaryMode::Bindle,
                        bindle_eviction_target_tokens: Some(self.config.bindle_eviction_target_tokens()),
                    })
                    .await?;
                bindle_rollup = Some(rollup);
            }
        }

        let outcome = CompactionOutcome {
            turn_decision,
            leaf_rollup,
            leaf_decision,
            bindle_rollup,
        };
        if outcome.rolled_up() {
            info!(
                session_id = %session_id,
                leaf = outcome.leaf_rollup.is_some(),
                bindle = outcome.bindle_rollup.is_some(),
                "compaction pass"
            );
        }
        Ok(outcome)
    }

    /// Assemble with the configured budget.
    pub async fn hydrate(&self, session_id: &SessionId, session_key: Option<&str>) -> Result<AssemblySnapshot> {
        let budget = &self.config.hydration;
        self.hydrate_with_budget(session_id, session_key, budget.token_budget, budget.runtime_reserve_tokens)
            .await
    }

    pub async fn hydrate_with_budget(
        &self,
        session_id: &SessionId,
        session_key: Option<&str>,
        token_budget: u64,
        runtime_reserve_tokens: u64,
    ) -> Result<AssemblySnapshot> {
        let _guard = self.lock_session(session_id).await;
        self.hydrator
            .hydrate(session_id, session_key, token_budget, runtime_reserve_tokens)
    }

    /// `ingest_missing_tail` runs while this session is locked, so it must
    /// write through [`Self::store`] rather than [`Self::ingest_turn`].
    pub async fn finalize_reset<F, E>(
        &self,
        session_id: &SessionId,
        session_key: Option<&str>,
        ingest_missing_tail: F,
    ) -> Result<ResetResult>
    where
        F: Future<Output = std::result::Result<u64, E>>,
        E: Display,
    {
        let _guard = self.lock_session(session_id).await;
        self.finalizer
            .finalize(session_id, session_key, ingest_missing_tail)
            .await
    }

    pub async fn bootstrap_session(&self, request: &BootstrapRequest) -> Result<BootstrapResult> {
        let _guard = self.lock_session(&request.session_id).await;
        Ok(self.store.bootstrap_session(request)?)
    }
}

/// Exclusive hold on one session. Dropping it prunes the lock entry once no
/// other caller holds or waits on it.
struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,
    session_id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Oldest leaves until the projected lane fits `target`, never fewer than
/// `min_leaves`. Empty when the lane holds fewer than `min_leaves`.
fn oldest_leaves_to_target(leaves: Vec<Record>, lane_tokens: u64, target: u64, min_leaves: usize) -> Vec<Record> {
    if leaves.len() < min_leaves.max(1) {
        return Vec::new();
    }
    let mut selected_tokens = 0u64;
    let mut take = 0usize;
    for leaf in &leaves {
        if take >= min_leaves && lane_tokens.saturating_sub(selected_tokens) <= target {
            break;
        }
        selected_tokens += leaf.token_count;
        take += 1;
    }
    leaves.into_iter().take(take).collect()
}
