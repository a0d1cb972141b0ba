use serde::{Deserialize, Serialize};

/// Database locations. Empty paths resolve under `~/.dolt/database/`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub db_path: String,
    pub journal_db_path: String,
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` still wins.
    pub level: String,
    /// Persist telemetry events to the journal database.
    pub journal_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            journal_enabled: true,
        }
    }
}
