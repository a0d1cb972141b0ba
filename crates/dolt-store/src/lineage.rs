use rusqlite::{params, Connection};

use dolt_core::{LineageEdge, Record};

use crate::error::StoreError;
use crate::records::{row_to_record, RECORD_COLUMNS};
use crate::row_helpers::{get, parse_enum};

const TABLE: &str = "dolt_lineage";

pub struct LineageRepo;

impl LineageRepo {
    pub fn insert(conn: &Connection, edge: &LineageEdge) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO dolt_lineage (parent_pointer, child_pointer, child_index, child_level, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                edge.parent_pointer,
                edge.child_pointer,
                edge.child_index,
                edge.child_level.as_str(),
                edge.created_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Direct child edges in child index order.
    pub fn children(conn: &Connection, parent_pointer: &str) -> Result<Vec<LineageEdge>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT parent_pointer, child_pointer, child_index, child_level, created_at_ms
             FROM dolt_lineage WHERE parent_pointer = ?1
             ORDER BY child_index ASC, child_pointer ASC",
        )?;
        let rows = stmt
            .query_map([parent_pointer], |row| Ok(row_to_edge(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Direct child records in child index order.
    pub fn child_records(conn: &Connection, parent_pointer: &str) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM dolt_lineage l
             JOIN dolt_records r ON r.pointer = l.child_pointer
             WHERE l.parent_pointer = ?1
             ORDER BY l.child_index ASC, l.child_pointer ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([parent_pointer], |row| Ok(row_to_record(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Pointers of every summary that lists `child_pointer` as a direct child.
    pub fn parents(conn: &Connection, child_pointer: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT parent_pointer FROM dolt_lineage WHERE child_pointer = ?1 ORDER BY parent_pointer",
        )?;
        let rows = stmt
            .query_map([child_pointer], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> Result<LineageEdge, StoreError> {
    let level: String = get(row, 3, TABLE, "child_level")?;
    Ok(LineageEdge {
        parent_pointer: get(row, 0, TABLE, "parent_pointer")?,
        child_pointer: get(row, 1, TABLE, "child_pointer")?,
        child_index: get(row, 2, TABLE, "child_index")?,
        child_level: parse_enum(&level, TABLE, "child_level")?,
        created_at_ms: get(row, 4, TABLE, "created_at_ms")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::records::RecordRepo;
    use dolt_core::{NewRecord, RecordLevel, SessionId};
    use serde_json::json;

    fn record(conn: &Connection, pointer: &str, level: RecordLevel) -> Result<(), StoreError> {
        RecordRepo::upsert(
            conn,
            &NewRecord {
                pointer: pointer.into(),
                session_id: SessionId::from_raw("s1"),
                session_key: None,
                level,
                event_ts_ms: 1,
                token_count: 1,
                payload: json!({}),
                finalized_at_reset: false,
            },
        )?;
        Ok(())
    }

    fn edge(parent: &str, child: &str, index: u32) -> LineageEdge {
        LineageEdge {
            parent_pointer: parent.into(),
            child_pointer: child.into(),
            child_index: index,
            child_level: RecordLevel::Turn,
            created_at_ms: 0,
        }
    }

    #[test]
    fn children_follow_index_order() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            record(conn, "leaf", RecordLevel::Leaf)?;
            record(conn, "t1", RecordLevel::Turn)?;
            record(conn, "t2", RecordLevel::Turn)?;
            LineageRepo::insert(conn, &edge("leaf", "t2", 1))?;
            LineageRepo::insert(conn, &edge("leaf", "t1", 0))?;

            let edges = LineageRepo::children(conn, "leaf")?;
            let pointers: Vec<_> = edges.iter().map(|e| e.child_pointer.as_str()).collect();
            assert_eq!(pointers, ["t1", "t2"]);

            let records = LineageRepo::child_records(conn, "leaf")?;
            assert_eq!(records.len(), 2);
            assert_eq!(LineageRepo::parents(conn, "t1")?, vec!["leaf".to_string()]);
            assert!(LineageRepo::parents(conn, "leaf")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn edge_to_unknown_record_is_rejected() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                record(conn, "leaf", RecordLevel::Leaf)?;
                LineageRepo::insert(conn, &edge("leaf", "ghost", 0))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
