//! Record repository. Records are append-only: a pointer, once written,
//! always resolves to the same content.

use rusqlite::{params, Connection, OptionalExtension};

use dolt_core::{NewRecord, Record, RecordLevel, SessionId};

use crate::error::StoreError;
use crate::row_helpers::{get, get_opt, get_u64, parse_enum, parse_json, to_sql_i64};

const TABLE: &str = "dolt_records";

pub(crate) const RECORD_COLUMNS: &str = "r.pointer, r.session_id, r.session_key, r.level, r.event_ts_ms, \
     r.token_count, r.payload_json, r.finalized_at_reset, r.created_at_ms";

/// Filter for [`RecordRepo::list`].
#[derive(Clone, Debug, Default)]
pub struct ListRecordsOptions {
    pub level: Option<RecordLevel>,
    pub limit: Option<u32>,
    pub newest_first: bool,
}

/// Record repository. Stateless; every method takes `&Connection`.
pub struct RecordRepo;

impl RecordRepo {
    /// Write a record. Re-writing identical content is a no-op that returns
    /// the stored row; different content under a known pointer is a conflict.
    pub fn upsert(conn: &Connection, new: &NewRecord) -> Result<Record, StoreError> {
        validate(new)?;

        if let Some(existing) = Self::get(conn, &new.pointer)? {
            if same_content(&existing, new) {
                return Ok(existing);
            }
            return Err(StoreError::Conflict(format!(
                "record {} already exists with different content",
                new.pointer
            )));
        }

        let now = dolt_core::now_ms();
        let payload_json = serde_json::to_string(&new.payload)?;
        conn.execute(
            "INSERT INTO dolt_records (
                 pointer, session_id, session_key, level, event_ts_ms, token_count,
                 payload_json, finalized_at_reset, created_at_ms, updated_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                new.pointer,
                new.session_id.as_str(),
                new.session_key,
                new.level.as_str(),
                new.event_ts_ms,
                to_sql_i64(new.token_count, "token_count")?,
                payload_json,
                new.finalized_at_reset,
                now,
            ],
        )?;

        Ok(Record {
            pointer: new.pointer.clone(),
            session_id: new.session_id.clone(),
            session_key: new.session_key.clone(),
            level: new.level,
            event_ts_ms: new.event_ts_ms,
            token_count: new.token_count,
            payload: new.payload.clone(),
            finalized_at_reset: new.finalized_at_reset,
            created_at_ms: now,
        })
    }

    pub fn get(conn: &Connection, pointer: &str) -> Result<Option<Record>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM dolt_records r WHERE r.pointer = ?1");
        let row = conn
            .query_row(&sql, [pointer], |row| Ok(row_to_record(row)))
            .optional()?;
        row.transpose()
    }

    /// Records for a session ordered by `event_ts_ms` (pointer breaks ties).
    pub fn list(
        conn: &Connection,
        session_id: &SessionId,
        opts: &ListRecordsOptions,
    ) -> Result<Vec<Record>, StoreError> {
        let dir = if opts.newest_first { "DESC" } else { "ASC" };
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM dolt_records r WHERE r.session_id = ?1");
        if opts.level.is_some() {
            sql.push_str(" AND r.level = ?2");
        }
        sql.push_str(&format!(" ORDER BY r.event_ts_ms {dir}, r.pointer {dir}"));
        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = match opts.level {
            Some(level) => stmt
                .query_map(params![session_id.as_str(), level.as_str()], |row| Ok(row_to_record(row)))?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([session_id.as_str()], |row| Ok(row_to_record(row)))?
                .collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().collect()
    }

    pub fn count_for_session(conn: &Connection, session_id: &SessionId) -> Result<u64, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dolt_records WHERE session_id = ?1",
            [session_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Records of a session that have no lane row and are nobody's child:
    /// written elsewhere and never indexed here.
    pub fn list_unindexed_roots(
        conn: &Connection,
        session_id: &SessionId,
    ) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM dolt_records r
             WHERE r.session_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM dolt_active_lane a
                   WHERE a.session_id = r.session_id AND a.level = r.level AND a.pointer = r.pointer
               )
               AND NOT EXISTS (SELECT 1 FROM dolt_lineage l WHERE l.child_pointer = r.pointer)
             ORDER BY r.event_ts_ms ASC, r.pointer ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([session_id.as_str()], |row| Ok(row_to_record(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }
}

fn validate(new: &NewRecord) -> Result<(), StoreError> {
    if new.pointer.trim().is_empty() {
        return Err(StoreError::InvalidInput("pointer must be a non-empty string".into()));
    }
    if new.session_id.as_str().trim().is_empty() {
        return Err(StoreError::InvalidInput("session_id must be a non-empty string".into()));
    }
    if new.event_ts_ms < 0 {
        return Err(StoreError::InvalidInput(format!(
            "event_ts_ms must be non-negative, got {}",
            new.event_ts_ms
        )));
    }
    Ok(())
}

// session_key is routing metadata and may differ between writers.
fn same_content(existing: &Record, new: &NewRecord) -> bool {
    existing.session_id == new.session_id
        && existing.level == new.level
        && existing.event_ts_ms == new.event_ts_ms
        && existing.token_count == new.token_count
        && existing.payload == new.payload
        && existing.finalized_at_reset == new.finalized_at_reset
}

/// Map a row selected with [`RECORD_COLUMNS`].
pub(crate) fn row_to_record(row: &rusqlite::Row<'_>) -> Result<Record, StoreError> {
    let level: String = get(row, 3, TABLE, "level")?;
    let payload_raw: String = get(row, 6, TABLE, "payload_json")?;
    Ok(Record {
        pointer: get(row, 0, TABLE, "pointer")?,
        session_id: SessionId::from_raw(get::<String>(row, 1, TABLE, "session_id")?),
        session_key: get_opt(row, 2, TABLE, "session_key")?,
        level: parse_enum(&level, TABLE, "level")?,
        event_ts_ms: get(row, 4, TABLE, "event_ts_ms")?,
        token_count: get_u64(row, 5, TABLE, "token_count")?,
        payload: parse_json(&payload_raw, TABLE, "payload_json")?,
        finalized_at_reset: get(row, 7, TABLE, "finalized_at_reset")?,
        created_at_ms: get(row, 8, TABLE, "created_at_ms")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;

    fn turn(pointer: &str, ts: i64, tokens: u64) -> NewRecord {
        NewRecord {
            pointer: pointer.into(),
            session_id: SessionId::from_raw("s1"),
            session_key: Some("agent:main".into()),
            level: RecordLevel::Turn,
            event_ts_ms: ts,
            token_count: tokens,
            payload: json!({"role": "user", "content": format!("message at {ts}")}),
            finalized_at_reset: false,
        }
    }

    #[test]
    fn insert_and_get() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let written = RecordRepo::upsert(conn, &turn("turn:s1:msg:1", 10, 100))?;
            let read = RecordRepo::get(conn, "turn:s1:msg:1")?.unwrap();
            assert_eq!(written, read);
            assert_eq!(read.payload["role"], "user");
            assert!(RecordRepo::get(conn, "missing")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn identical_upsert_is_noop() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let first = RecordRepo::upsert(conn, &turn("p", 10, 100))?;
            let second = RecordRepo::upsert(conn, &turn("p", 10, 100))?;
            assert_eq!(first.created_at_ms, second.created_at_ms);
            assert_eq!(RecordRepo::count_for_session(conn, &SessionId::from_raw("s1"))?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rewriting_content_conflicts() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            RecordRepo::upsert(conn, &turn("p", 10, 100))?;
            let err = RecordRepo::upsert(conn, &turn("p", 10, 101)).unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rejects_blank_pointer() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| RecordRepo::upsert(conn, &turn("  ", 1, 1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn list_orders_by_timestamp_then_pointer() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            RecordRepo::upsert(conn, &turn("b", 20, 1))?;
            RecordRepo::upsert(conn, &turn("a", 20, 1))?;
            RecordRepo::upsert(conn, &turn("c", 10, 1))?;

            let sid = SessionId::from_raw("s1");
            let asc = RecordRepo::list(conn, &sid, &ListRecordsOptions::default())?;
            let pointers: Vec<_> = asc.iter().map(|r| r.pointer.as_str()).collect();
            assert_eq!(pointers, ["c", "a", "b"]);

            let newest = RecordRepo::list(
                conn,
                &sid,
                &ListRecordsOptions {
                    level: Some(RecordLevel::Turn),
                    limit: Some(1),
                    newest_first: true,
                },
            )?;
            assert_eq!(newest[0].pointer, "b");

            let leaves = RecordRepo::list(
                conn,
                &sid,
                &ListRecordsOptions {
                    level: Some(RecordLevel::Leaf),
                    ..Default::default()
                },
            )?;
            assert!(leaves.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn corrupt_payload_is_reported() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            RecordRepo::upsert(conn, &turn("p", 10, 1))?;
            conn.execute("UPDATE dolt_records SET payload_json = '{broken' WHERE pointer = 'p'", [])?;
            let err = RecordRepo::get(conn, "p").unwrap_err();
            assert!(matches!(err, StoreError::CorruptRow { column: "payload_json", .. }));
            Ok(())
        })
        .unwrap();
    }
}
