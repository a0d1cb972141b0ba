//! Rollup execution: summarize a run of records into one parent and commit
//! it with its lineage and lane flips in a single store transaction.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use dolt_core::tokens::estimate_text_tokens;
use dolt_core::{
    DatesCovered, NewRecord, Record, RecordLevel, SessionId, SummaryFrontmatter, SummaryMode,
    SummaryPayload,
};
use dolt_store::{DoltStore, LaneSnapshot, RollupCommit, StoreError};
use dolt_telemetry::events::{BindleEviction, RollupCompleted, SummaryQuality, TelemetryKind};
use dolt_telemetry::{TelemetryBus, TelemetryEvent};

use crate::error::{EngineError, Result};
use crate::summarizer::{SummarizeParams, SummarizeResult, Summarizer, SummarySource};

#[derive(Clone, Debug)]
pub struct RollupRequest {
    pub session_id: SessionId,
    pub session_key: Option<String>,
    /// Children in summary order, normally oldest first.
    pub source_records: Vec<Record>,
    pub target_level: RecordLevel,
    pub mode: SummaryMode,
    /// Active bindle budget enforced after a bindle rollup. `None` skips eviction.
    pub bindle_eviction_target_tokens: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct RollupResult {
    pub parent: Record,
    pub child_pointers: Vec<String>,
    /// Oldest first.
    pub evicted_pointers: Vec<String>,
    pub lanes_before: LaneSnapshot,
    pub lanes_after: LaneSnapshot,
}

/// Runs rollups against one store. Cheap to clone.
#[derive(Clone)]
pub struct RollupExecutor {
    store: DoltStore,
    bus: TelemetryBus,
    summarizer: Arc<dyn Summarizer>,
    summarize_timeout: Option<Duration>,
}

impl RollupExecutor {
    pub fn new(store: DoltStore, bus: TelemetryBus, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            store,
            bus,
            summarizer,
            summarize_timeout: None,
        }
    }

    #[must_use]
    pub fn with_summarize_timeout(mut self, timeout: Duration) -> Self {
        self.summarize_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &DoltStore {
        &self.store
    }

    pub fn bus(&self) -> &TelemetryBus {
        &self.bus
    }

    #[instrument(skip_all, fields(session_id = %request.session_id, target = %request.target_level, mode = %request.mode))]
    pub async fn execute(&self, request: RollupRequest) -> Result<RollupResult> {
        self.validate(&request)?;

        let sources = &request.source_records;
        let dates = DatesCovered::spanning(sources.iter().map(|r| r.event_ts_ms))
            .ok_or_else(|| EngineError::InvalidRollup("rollup requires source records".into()))?;
        let child_pointers: Vec<String> = sources.iter().map(|r| r.pointer.clone()).collect();
        let finalized_at_reset = request.mode == SummaryMode::ResetShortBindle;

        let params = SummarizeParams {
            mode: request.mode,
            child_pointers: child_pointers.clone(),
            dates_covered: dates,
            sources: sources.iter().map(SummarySource::from_record).collect(),
            finalized_at_reset,
        };
        let summary = self.summarize(&params).await?;

        let payload = SummaryPayload {
            frontmatter: SummaryFrontmatter {
                summary_type: request.mode,
                dates_covered: dates,
                children: child_pointers.clone(),
                finalized_at_reset,
            },
            summary: summary.summary,
            metadata: summary.metadata,
            model_selection: summary.model_selection,
        };
        let token_count = estimate_text_tokens(&payload.render());
        let pointer = match request.mode {
            SummaryMode::ResetShortBindle => {
                reset_bindle_pointer(&request.session_id, dates.end_epoch_ms, &child_pointers)
            }
            SummaryMode::Leaf | SummaryMode::Bindle => rollup_pointer(
                request.target_level,
                &request.session_id,
                dates.end_epoch_ms,
                &child_pointers,
            ),
        };

        let commit = RollupCommit {
            parent: NewRecord {
                pointer,
                session_id: request.session_id.clone(),
                session_key: request.session_key.clone(),
                level: request.target_level,
                event_ts_ms: dates.end_epoch_ms,
                token_count,
                payload: serde_json::to_value(&payload).map_err(StoreError::from)?,
                finalized_at_reset,
            },
            children: request.source_records.clone(),
            bindle_eviction_target_tokens: match request.target_level {
                RecordLevel::Bindle => request.bindle_eviction_target_tokens,
                _ => None,
            },
        };
        let outcome = self.store.commit_rollup(&commit)?;

        self.emit_quality(&request, token_count);
        if let (Some(oldest), Some(newest)) = (outcome.evicted.first(), outcome.evicted.last()) {
            let evicted_count = outcome.evicted.len() as u64;
            self.emit(
                &request,
                TelemetryKind::BindleEviction(BindleEviction {
                    before_active_count: outcome.bindles_before_eviction,
                    after_active_count: outcome.bindles_before_eviction - evicted_count,
                    evicted_count,
                    evicted_token_total: outcome.evicted.iter().map(|r| r.token_count).sum(),
                    eviction_target_tokens: commit.bindle_eviction_target_tokens.unwrap_or_default(),
                    oldest_evicted_pointer: oldest.pointer.clone(),
                    newest_evicted_pointer: newest.pointer.clone(),
                }),
            );
        }
        self.emit(
            &request,
            TelemetryKind::RollupCompleted(RollupCompleted {
                target_level: request.target_level,
                summary_mode: request.mode,
                parent_pointer: outcome.parent.pointer.clone(),
                child_pointer_count: child_pointers.len() as u64,
                bindle_eviction_count: outcome.evicted.len() as u64,
                lane_active_record_counts_before: outcome.lanes_before.active_counts,
                lane_active_record_counts_after: outcome.lanes_after.active_counts,
            }),
        );

        info!(
            parent = %outcome.parent.pointer,
            children = child_pointers.len(),
            evicted = outcome.evicted.len(),
            token_count,
            "rollup completed"
        );

        Ok(RollupResult {
            evicted_pointers: outcome.evicted.iter().map(|r| r.pointer.clone()).collect(),
            parent: outcome.parent,
            child_pointers,
            lanes_before: outcome.lanes_before,
            lanes_after: outcome.lanes_after,
        })
    }

    fn validate(&self, request: &RollupRequest) -> Result<()> {
        if request.source_records.is_empty() {
            return Err(EngineError::InvalidRollup("rollup requires source records".into()));
        }
        if !request.target_level.is_summary() {
            return Err(EngineError::InvalidRollup(format!(
                "target level must be leaf or bindle, got {}",
                request.target_level
            )));
        }
        if request.mode.target_level() != request.target_level {
            return Err(EngineError::InvalidRollup(format!(
                "{} mode cannot produce a {} record",
                request.mode, request.target_level
            )));
        }

        for source in &request.source_records {
            if source.session_id != request.session_id {
                return Err(EngineError::InvalidRollup(format!(
                    "source {} belongs to session {}",
                    source.pointer, source.session_id
                )));
            }
            let allowed = match request.mode {
                SummaryMode::ResetShortBindle => source.level < RecordLevel::Bindle,
                SummaryMode::Leaf | SummaryMode::Bindle => {
                    request.target_level.source_level() == Some(source.level)
                }
            };
            if !allowed {
                return Err(EngineError::InvalidRollup(format!(
                    "source {} ({}) cannot roll up into {} via {}",
                    source.pointer, source.level, request.target_level, request.mode
                )));
            }
            if !self
                .store
                .is_active(&request.session_id, source.level, &source.pointer)?
            {
                return Err(EngineError::InvalidRollup(format!(
                    "source {} is not active",
                    source.pointer
                )));
            }
        }
        Ok(())
    }

    async fn summarize(&self, params: &SummarizeParams) -> Result<SummarizeResult> {
        let call = self.summarizer.summarize(params);
        let result = match self.summarize_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| EngineError::SummarizeTimeout(timeout))?,
            None => call.await,
        };
        match result {
            Ok(summary) => Ok(summary),
            Err(e) => {
                debug!(mode = %params.mode, error = %e, "summarizer failed; nothing committed");
                Err(e.into())
            }
        }
    }

    fn emit_quality(&self, request: &RollupRequest, summary_token_count: u64) {
        let sources = &request.source_records;
        let count_at = |level| sources.iter().filter(|r| r.level == level).count() as u64;
        let quality = SummaryQuality {
            summary_mode: request.mode,
            target_level: request.target_level,
            source_record_count: sources.len() as u64,
            source_turn_count: count_at(RecordLevel::Turn),
            source_leaf_count: count_at(RecordLevel::Leaf),
            source_token_total: sources.iter().map(|r| r.token_count).sum(),
            source_token_min: sources.iter().map(|r| r.token_count).min().unwrap_or(0),
            source_token_max: sources.iter().map(|r| r.token_count).max().unwrap_or(0),
            summary_token_count,
            reset_forced_summary_count: u64::from(request.mode == SummaryMode::ResetShortBindle),
        };
        let kind = match request.mode {
            SummaryMode::ResetShortBindle => TelemetryKind::ResetSummaryQuality(quality),
            SummaryMode::Leaf | SummaryMode::Bindle => TelemetryKind::RollupSummaryQuality(quality),
        };
        self.emit(request, kind);
    }

    fn emit(&self, request: &RollupRequest, kind: TelemetryKind) {
        self.bus.emit(TelemetryEvent::new(
            &request.session_id,
            request.session_key.as_deref(),
            kind,
        ));
    }
}

fn digest12(parts: &[&str]) -> String {
    let digest = Sha256::digest(parts.join("|").as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(12);
    hex
}

/// `{level}:{session}:{end_ts}:{digest}`, salted so two rollups over the
/// same children never collide.
fn rollup_pointer(
    level: RecordLevel,
    session_id: &SessionId,
    end_ts_ms: i64,
    child_pointers: &[String],
) -> String {
    let salt = uuid::Uuid::now_v7().to_string();
    let end = end_ts_ms.to_string();
    let mut parts: Vec<&str> = vec![session_id.as_str(), end.as_str()];
    parts.extend(child_pointers.iter().map(String::as_str));
    parts.push(salt.as_str());
    format!("{level}:{session_id}:{end_ts_ms}:{}", digest12(&parts))
}

/// Deterministic pointer for the one reset short bindle over `child_pointers`.
fn reset_bindle_pointer(session_id: &SessionId, end_ts_ms: i64, child_pointers: &[String]) -> String {
    let end = end_ts_ms.to_string();
    let mut parts: Vec<&str> = vec![session_id.as_str(), end.as_str()];
    parts.extend(child_pointers.iter().map(String::as_str));
    format!("bindle:{session_id}:reset:{end_ts_ms}:{}", digest12(&parts))
}
