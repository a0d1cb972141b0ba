use std::path::Path;

use tracing::{debug, info};

use dolt_core::{
    ActiveLaneEntry, LaneUpsert, LineageEdge, NewRecord, PerLevel, Record, RecordLevel, SessionId,
};

use crate::bootstrap::{self, BootstrapRequest, BootstrapResult, BootstrapSkipReason};
use crate::database::Database;
use crate::error::StoreError;
use crate::lanes::{LaneRepo, LaneSnapshot};
use crate::lineage::LineageRepo;
use crate::records::{ListRecordsOptions, RecordRepo};
use crate::rollup::{self, RollupCommit, RollupCommitOutcome};

/// Result of [`DoltStore::upsert_active_record`].
#[derive(Clone, Debug, PartialEq)]
pub struct UpsertOutcome {
    pub record: Record,
    /// False when an identical record already existed; its lane row is left alone.
    pub created: bool,
}

/// Durable record store: immutable records, lineage edges and the mutable
/// active lane index. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct DoltStore {
    db: Database,
}

impl DoltStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn upsert_record(&self, record: &NewRecord) -> Result<Record, StoreError> {
        self.db.with_conn(|conn| RecordRepo::upsert(conn, record))
    }

    pub fn get_record(&self, pointer: &str) -> Result<Option<Record>, StoreError> {
        self.db.with_conn(|conn| RecordRepo::get(conn, pointer))
    }

    pub fn require_record(&self, pointer: &str) -> Result<Record, StoreError> {
        self.get_record(pointer)?
            .ok_or_else(|| StoreError::NotFound(format!("record {pointer}")))
    }

    pub fn list_records(
        &self,
        session_id: &SessionId,
        opts: &ListRecordsOptions,
    ) -> Result<Vec<Record>, StoreError> {
        self.db.with_conn(|conn| RecordRepo::list(conn, session_id, opts))
    }

    pub fn count_session_records(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| RecordRepo::count_for_session(conn, session_id))
    }

    /// Write a record and mark it active, in one transaction. Re-ingesting an
    /// identical record does not reactivate it.
    pub fn upsert_active_record(&self, record: &NewRecord) -> Result<UpsertOutcome, StoreError> {
        self.db.with_tx(|tx| {
            let existed = RecordRepo::get(tx, &record.pointer)?.is_some();
            let stored = RecordRepo::upsert(tx, record)?;
            if !existed {
                LaneRepo::upsert(tx, &activation(&stored))?;
            }
            Ok(UpsertOutcome {
                record: stored,
                created: !existed,
            })
        })
    }

    pub fn upsert_active_lane(&self, upsert: &LaneUpsert) -> Result<ActiveLaneEntry, StoreError> {
        self.db.with_conn(|conn| LaneRepo::upsert(conn, upsert))
    }

    /// Lane rows for one level, newest first.
    pub fn list_active_lane(
        &self,
        session_id: &SessionId,
        level: RecordLevel,
        active_only: bool,
    ) -> Result<Vec<ActiveLaneEntry>, StoreError> {
        self.db
            .with_conn(|conn| LaneRepo::list(conn, session_id, level, active_only))
    }

    /// Active records for one level, oldest first.
    pub fn list_active_records(
        &self,
        session_id: &SessionId,
        level: RecordLevel,
    ) -> Result<Vec<Record>, StoreError> {
        self.db
            .with_conn(|conn| LaneRepo::active_records(conn, session_id, level))
    }

    pub fn is_active(
        &self,
        session_id: &SessionId,
        level: RecordLevel,
        pointer: &str,
    ) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| LaneRepo::is_active(conn, session_id, level, pointer))
    }

    pub fn lane_snapshot(&self, session_id: &SessionId) -> Result<LaneSnapshot, StoreError> {
        self.db.with_conn(|conn| LaneRepo::snapshot(conn, session_id))
    }

    pub fn active_token_count(
        &self,
        session_id: &SessionId,
        level: RecordLevel,
    ) -> Result<u64, StoreError> {
        Ok(*self.lane_snapshot(session_id)?.active_tokens.get(level))
    }

    pub fn list_direct_children(&self, parent_pointer: &str) -> Result<Vec<LineageEdge>, StoreError> {
        self.db.with_conn(|conn| LineageRepo::children(conn, parent_pointer))
    }

    pub fn list_direct_child_records(&self, parent_pointer: &str) -> Result<Vec<Record>, StoreError> {
        self.db
            .with_conn(|conn| LineageRepo::child_records(conn, parent_pointer))
    }

    pub fn list_parents(&self, child_pointer: &str) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| LineageRepo::parents(conn, child_pointer))
    }

    /// Records with no lane row that are nobody's child, oldest first.
    pub fn list_unindexed_roots(&self, session_id: &SessionId) -> Result<Vec<Record>, StoreError> {
        self.db
            .with_conn(|conn| RecordRepo::list_unindexed_roots(conn, session_id))
    }

    /// Activate the given records in one transaction. Returns per-level counts.
    pub fn activate_records(&self, records: &[Record]) -> Result<PerLevel<u64>, StoreError> {
        self.db.with_tx(|tx| {
            let mut counts = PerLevel::<u64>::default();
            for record in records {
                LaneRepo::upsert(tx, &activation(record))?;
                *counts.get_mut(record.level) += 1;
            }
            Ok(counts)
        })
    }

    /// Insert a summary, link and deactivate its children, activate it and
    /// evict bindles over budget. All or nothing.
    pub fn commit_rollup(&self, commit: &RollupCommit) -> Result<RollupCommitOutcome, StoreError> {
        self.db.with_tx(|tx| rollup::commit(tx, commit))
    }

    /// Import turns for a session that has no records yet.
    pub fn bootstrap_session(&self, request: &BootstrapRequest) -> Result<BootstrapResult, StoreError> {
        if request.session_id.as_str().trim().is_empty() {
            return Err(StoreError::InvalidInput("session_id must be a non-empty string".into()));
        }
        if self.count_session_records(&request.session_id)? > 0 {
            return Ok(BootstrapResult::skipped(BootstrapSkipReason::SessionNotEmpty));
        }

        let (origin, turns) = match bootstrap::load_turns(&request.session_id, &request.source)? {
            Ok(loaded) => loaded,
            Err(reason) => {
                debug!(session_id = %request.session_id, ?reason, "bootstrap skipped");
                return Ok(BootstrapResult::skipped(reason));
            }
        };

        let imported = self.db.with_tx(|tx| {
            for turn in &turns {
                let record = RecordRepo::upsert(
                    tx,
                    &NewRecord {
                        pointer: turn.pointer.clone(),
                        session_id: request.session_id.clone(),
                        session_key: request.session_key.clone(),
                        level: RecordLevel::Turn,
                        event_ts_ms: turn.event_ts_ms,
                        token_count: turn.token_count,
                        payload: turn.payload.clone(),
                        finalized_at_reset: false,
                    },
                )?;
                LaneRepo::upsert(tx, &activation(&record))?;
            }
            Ok(turns.len() as u64)
        })?;

        info!(session_id = %request.session_id, imported, source = ?origin, "session bootstrapped");
        Ok(BootstrapResult {
            bootstrapped: true,
            imported_records: imported,
            reason: None,
            source: Some(origin),
        })
    }
}

fn activation(record: &Record) -> LaneUpsert {
    LaneUpsert {
        session_id: record.session_id.clone(),
        session_key: record.session_key.clone(),
        level: record.level,
        pointer: record.pointer.clone(),
        is_active: true,
        last_event_ts_ms: record.event_ts_ms,
    }
}
