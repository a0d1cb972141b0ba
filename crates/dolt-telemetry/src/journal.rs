use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::{SubscriptionId, TelemetryBus};
use crate::events::TelemetryEvent;

/// A telemetry event persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: i64,
    pub emitted_at_ms: i64,
    pub event_type: String,
    pub session_id: Option<String>,
    pub session_key: Option<String>,
    pub payload: String,
}

impl JournalRecord {
    /// Rebuild the typed event from its stored form.
    pub fn to_event(&self) -> Result<TelemetryEvent, serde_json::Error> {
        let mut wire = serde_json::json!({
            "emitted_at_ms": self.emitted_at_ms,
            "event_type": self.event_type,
            "payload": serde_json::from_str::<serde_json::Value>(&self.payload)?,
        });
        if let Some(sid) = &self.session_id {
            wire["session_id"] = serde_json::Value::String(sid.clone());
        }
        if let Some(key) = &self.session_key {
            wire["session_key"] = serde_json::Value::String(key.clone());
        }
        serde_json::from_value(wire)
    }
}

/// Query parameters for searching journaled events.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub session_id: Option<String>,
    pub event_type: Option<String>,
    pub since_ms: Option<i64>,
    pub limit: Option<u32>,
}

/// Append-only SQLite journal of telemetry events.
pub struct SqliteEventJournal {
    conn: Mutex<Connection>,
}

impl SqliteEventJournal {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS dolt_telemetry_events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 emitted_at_ms INTEGER NOT NULL,
                 event_type TEXT NOT NULL,
                 session_id TEXT,
                 session_key TEXT,
                 payload TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_telemetry_session ON dolt_telemetry_events(session_id);
             CREATE INDEX IF NOT EXISTS idx_telemetry_type ON dolt_telemetry_events(event_type, emitted_at_ms);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(&self, event: &TelemetryEvent) -> Result<(), rusqlite::Error> {
        let payload = serde_json::to_value(&event.kind)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dolt_telemetry_events (emitted_at_ms, event_type, session_id, session_key, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                event.emitted_at_ms,
                event.event_type(),
                event.session_id.as_ref().map(|s| s.as_str().to_string()),
                event.session_key,
                payload.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Persist every event emitted on `bus` from now on.
    pub fn attach(self: &Arc<Self>, bus: &TelemetryBus) -> SubscriptionId {
        let journal = Arc::clone(self);
        bus.subscribe(move |event| {
            if let Err(e) = journal.record(event) {
                warn!(event_type = event.event_type(), error = %e, "failed to journal telemetry event");
            }
        })
    }

    pub fn query(&self, q: &EventQuery) -> Result<Vec<JournalRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, emitted_at_ms, event_type, session_id, session_key, payload
             FROM dolt_telemetry_events WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(session_id) = &q.session_id {
            sql.push_str(&format!(" AND session_id = ?{}", params.len() + 1));
            params.push(Box::new(session_id.clone()));
        }
        if let Some(event_type) = &q.event_type {
            sql.push_str(&format!(" AND event_type = ?{}", params.len() + 1));
            params.push(Box::new(event_type.clone()));
        }
        if let Some(since) = q.since_ms {
            sql.push_str(&format!(" AND emitted_at_ms >= ?{}", params.len() + 1));
            params.push(Box::new(since));
        }

        sql.push_str(" ORDER BY id DESC");

        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(JournalRecord {
                id: row.get(0)?,
                emitted_at_ms: row.get(1)?,
                event_type: row.get(2)?,
                session_id: row.get(3)?,
                session_key: row.get(4)?,
                payload: row.get(5)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM dolt_telemetry_events", [], |row| row.get(0))
    }
}
