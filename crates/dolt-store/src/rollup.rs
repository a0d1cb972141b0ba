//! Atomic rollup commit: parent insert, lineage, lane flips and bindle
//! eviction in one transaction.

use rusqlite::Connection;
use tracing::debug;

use dolt_core::{LaneUpsert, LineageEdge, NewRecord, Record, RecordLevel, SessionId};

use crate::error::StoreError;
use crate::lanes::{LaneRepo, LaneSnapshot};
use crate::lineage::LineageRepo;
use crate::records::RecordRepo;

/// Everything a rollup writes.
#[derive(Clone, Debug)]
pub struct RollupCommit {
    pub parent: NewRecord,
    /// Children in summary order. Each must be active in its lane.
    pub children: Vec<Record>,
    /// Active bindle token budget. Applies only when the parent is a bindle.
    pub bindle_eviction_target_tokens: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct RollupCommitOutcome {
    pub parent: Record,
    /// Deactivated bindles, oldest first.
    pub evicted: Vec<Record>,
    /// Active bindles other than the new parent before eviction ran.
    pub bindles_before_eviction: u64,
    pub lanes_before: LaneSnapshot,
    pub lanes_after: LaneSnapshot,
}

pub(crate) fn commit(conn: &Connection, commit: &RollupCommit) -> Result<RollupCommitOutcome, StoreError> {
    validate(commit)?;
    let session_id = &commit.parent.session_id;
    let lanes_before = LaneRepo::snapshot(conn, session_id)?;

    let parent = RecordRepo::upsert(conn, &commit.parent)?;
    let created_at_ms = parent.created_at_ms;
    for (idx, child) in commit.children.iter().enumerate() {
        let child_index = u32::try_from(idx)
            .map_err(|_| StoreError::InvalidInput(format!("too many children: {idx}")))?;
        LineageRepo::insert(
            conn,
            &LineageEdge {
                parent_pointer: parent.pointer.clone(),
                child_pointer: child.pointer.clone(),
                child_index,
                child_level: child.level,
                created_at_ms,
            },
        )?;
    }

    LaneRepo::upsert(
        conn,
        &LaneUpsert {
            session_id: session_id.clone(),
            session_key: parent.session_key.clone(),
            level: parent.level,
            pointer: parent.pointer.clone(),
            is_active: true,
            last_event_ts_ms: parent.event_ts_ms,
        },
    )?;
    for child in &commit.children {
        LaneRepo::deactivate(conn, session_id, child.level, &child.pointer)?;
    }

    let (bindles_before_eviction, evicted) = match (parent.level, commit.bindle_eviction_target_tokens) {
        (RecordLevel::Bindle, Some(budget)) => evict_bindles(conn, session_id, &parent.pointer, budget)?,
        _ => (0, Vec::new()),
    };

    let lanes_after = LaneRepo::snapshot(conn, session_id)?;
    debug!(
        session_id = %session_id,
        parent = %parent.pointer,
        children = commit.children.len(),
        evicted = evicted.len(),
        "rollup committed"
    );

    Ok(RollupCommitOutcome {
        parent,
        evicted,
        bindles_before_eviction,
        lanes_before,
        lanes_after,
    })
}

fn validate(commit: &RollupCommit) -> Result<(), StoreError> {
    if !commit.parent.level.is_summary() {
        return Err(StoreError::InvalidInput(format!(
            "rollup parent must be a summary, got {}",
            commit.parent.level
        )));
    }
    if commit.children.is_empty() {
        return Err(StoreError::InvalidInput("rollup requires at least one child".into()));
    }
    if let Some(foreign) = commit
        .children
        .iter()
        .find(|c| c.session_id != commit.parent.session_id)
    {
        return Err(StoreError::InvalidInput(format!(
            "child {} belongs to session {}",
            foreign.pointer, foreign.session_id
        )));
    }
    if let Some(bad) = commit.children.iter().find(|c| c.level >= commit.parent.level) {
        return Err(StoreError::InvalidInput(format!(
            "child {} ({}) is not below {}",
            bad.pointer, bad.level, commit.parent.level
        )));
    }
    Ok(())
}

/// Deactivate the oldest bindles other than `keep` until the active bindle
/// token total fits `budget`. The kept bindle is never evicted.
fn evict_bindles(
    conn: &Connection,
    session_id: &SessionId,
    keep: &str,
    budget: u64,
) -> Result<(u64, Vec<Record>), StoreError> {
    let active = LaneRepo::active_records(conn, session_id, RecordLevel::Bindle)?;
    let mut total: u64 = active.iter().map(|r| r.token_count).sum();
    let candidates: Vec<Record> = active.into_iter().filter(|r| r.pointer != keep).collect();
    let before = candidates.len() as u64;

    let mut evicted = Vec::new();
    for candidate in candidates {
        if total <= budget {
            break;
        }
        LaneRepo::deactivate(conn, session_id, RecordLevel::Bindle, &candidate.pointer)?;
        total = total.saturating_sub(candidate.token_count);
        evicted.push(candidate);
    }
    Ok((before, evicted))
}
