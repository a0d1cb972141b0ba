//! Active lane index: which records are currently part of the assembled
//! context at each level. The only mutable state in the store.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use dolt_core::{ActiveLaneEntry, LaneUpsert, PerLevel, Record, RecordLevel, SessionId};

use crate::error::StoreError;
use crate::records::{row_to_record, RECORD_COLUMNS};
use crate::row_helpers::{get, get_opt, get_u64, parse_enum};

const TABLE: &str = "dolt_active_lane";

/// Active record counts and token totals per level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub active_counts: PerLevel<u64>,
    pub active_tokens: PerLevel<u64>,
}

pub struct LaneRepo;

impl LaneRepo {
    /// Insert or update the single row for `(session, level, pointer)`.
    pub fn upsert(conn: &Connection, upsert: &LaneUpsert) -> Result<ActiveLaneEntry, StoreError> {
        if upsert.pointer.trim().is_empty() {
            return Err(StoreError::InvalidInput("pointer must be a non-empty string".into()));
        }
        let now = dolt_core::now_ms();
        conn.execute(
            "INSERT INTO dolt_active_lane (
                 session_id, session_key, level, pointer, is_active, last_event_ts_ms, updated_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id, level, pointer) DO UPDATE SET
                 session_key = COALESCE(excluded.session_key, dolt_active_lane.session_key),
                 is_active = excluded.is_active,
                 last_event_ts_ms = excluded.last_event_ts_ms,
                 updated_at_ms = excluded.updated_at_ms",
            params![
                upsert.session_id.as_str(),
                upsert.session_key,
                upsert.level.as_str(),
                upsert.pointer,
                upsert.is_active,
                upsert.last_event_ts_ms,
                now,
            ],
        )?;

        conn.query_row(
            "SELECT session_id, session_key, level, pointer, is_active, last_event_ts_ms, updated_at_ms
             FROM dolt_active_lane WHERE session_id = ?1 AND level = ?2 AND pointer = ?3",
            params![upsert.session_id.as_str(), upsert.level.as_str(), upsert.pointer],
            |row| Ok(row_to_entry(row)),
        )?
    }

    /// Flip an active row to inactive. Fails with `Conflict` when the row is
    /// missing or already inactive, so callers cannot deactivate twice.
    pub fn deactivate(
        conn: &Connection,
        session_id: &SessionId,
        level: RecordLevel,
        pointer: &str,
    ) -> Result<(), StoreError> {
        let changed = conn.execute(
            "UPDATE dolt_active_lane SET is_active = 0, updated_at_ms = ?4
             WHERE session_id = ?1 AND level = ?2 AND pointer = ?3 AND is_active = 1",
            params![session_id.as_str(), level.as_str(), pointer, dolt_core::now_ms()],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("{level} {pointer} is not active")));
        }
        Ok(())
    }

    /// Lane rows for one level, newest first.
    pub fn list(
        conn: &Connection,
        session_id: &SessionId,
        level: RecordLevel,
        active_only: bool,
    ) -> Result<Vec<ActiveLaneEntry>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT session_id, session_key, level, pointer, is_active, last_event_ts_ms, updated_at_ms
             FROM dolt_active_lane
             WHERE session_id = ?1 AND level = ?2 AND (?3 = 0 OR is_active = 1)
             ORDER BY last_event_ts_ms DESC, pointer DESC",
        )?;
        let rows = stmt
            .query_map(
                params![session_id.as_str(), level.as_str(), active_only],
                |row| Ok(row_to_entry(row)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Active records at one level, oldest first.
    pub fn active_records(
        conn: &Connection,
        session_id: &SessionId,
        level: RecordLevel,
    ) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM dolt_active_lane a
             JOIN dolt_records r ON r.pointer = a.pointer
             WHERE a.session_id = ?1 AND a.level = ?2 AND a.is_active = 1
             ORDER BY r.event_ts_ms ASC, r.pointer ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![session_id.as_str(), level.as_str()], |row| {
                Ok(row_to_record(row))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn is_active(
        conn: &Connection,
        session_id: &SessionId,
        level: RecordLevel,
        pointer: &str,
    ) -> Result<bool, StoreError> {
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dolt_active_lane
             WHERE session_id = ?1 AND level = ?2 AND pointer = ?3 AND is_active = 1",
            params![session_id.as_str(), level.as_str(), pointer],
            |row| row.get(0),
        )?;
        Ok(active > 0)
    }

    pub fn snapshot(conn: &Connection, session_id: &SessionId) -> Result<LaneSnapshot, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT a.level, COUNT(*), COALESCE(SUM(r.token_count), 0)
             FROM dolt_active_lane a
             JOIN dolt_records r ON r.pointer = a.pointer
             WHERE a.session_id = ?1 AND a.is_active = 1
             GROUP BY a.level",
        )?;
        let mut rows = stmt.query([session_id.as_str()])?;
        let mut snapshot = LaneSnapshot::default();
        while let Some(row) = rows.next()? {
            let level: String = get(row, 0, TABLE, "level")?;
            let level: RecordLevel = parse_enum(&level, TABLE, "level")?;
            *snapshot.active_counts.get_mut(level) = get_u64(row, 1, TABLE, "count")?;
            *snapshot.active_tokens.get_mut(level) = get_u64(row, 2, TABLE, "token_count")?;
        }
        Ok(snapshot)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<ActiveLaneEntry, StoreError> {
    let level: String = get(row, 2, TABLE, "level")?;
    Ok(ActiveLaneEntry {
        session_id: SessionId::from_raw(get::<String>(row, 0, TABLE, "session_id")?),
        session_key: get_opt(row, 1, TABLE, "session_key")?,
        level: parse_enum(&level, TABLE, "level")?,
        pointer: get(row, 3, TABLE, "pointer")?,
        is_active: get(row, 4, TABLE, "is_active")?,
        last_event_ts_ms: get(row, 5, TABLE, "last_event_ts_ms")?,
        updated_at_ms: get(row, 6, TABLE, "updated_at_ms")?,
    })
}
