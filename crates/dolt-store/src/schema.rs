/// SQL DDL for the dolt record store.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS dolt_records (
    pointer TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    session_key TEXT,
    level TEXT NOT NULL CHECK (level IN ('turn', 'leaf', 'bindle')),
    event_ts_ms INTEGER NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    payload_json TEXT NOT NULL,
    finalized_at_reset INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dolt_lineage (
    parent_pointer TEXT NOT NULL REFERENCES dolt_records(pointer),
    child_pointer TEXT NOT NULL REFERENCES dolt_records(pointer),
    child_index INTEGER NOT NULL,
    child_level TEXT NOT NULL CHECK (child_level IN ('turn', 'leaf', 'bindle')),
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (parent_pointer, child_pointer)
);

CREATE TABLE IF NOT EXISTS dolt_active_lane (
    session_id TEXT NOT NULL,
    session_key TEXT,
    level TEXT NOT NULL CHECK (level IN ('turn', 'leaf', 'bindle')),
    pointer TEXT NOT NULL REFERENCES dolt_records(pointer),
    is_active INTEGER NOT NULL DEFAULT 1,
    last_event_ts_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (session_id, level, pointer)
);

CREATE INDEX IF NOT EXISTS idx_dolt_records_session_level_ts
    ON dolt_records(session_id, level, event_ts_ms, pointer);
CREATE INDEX IF NOT EXISTS idx_dolt_lineage_child ON dolt_lineage(child_pointer);
CREATE INDEX IF NOT EXISTS idx_dolt_active_lane_session_level
    ON dolt_active_lane(session_id, level, is_active, last_event_ts_ms);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
