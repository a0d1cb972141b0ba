mod bus;
pub mod events;
mod journal;

pub use bus::{EventCollector, SubscriptionId, TelemetryBus, TelemetryHandler};
pub use events::{
    AssemblySnapshot, BindleEviction, BootstrapHydration, LanePressureDecision,
    ResetFinalizationCompleted, RollupCompleted, SummaryQuality, TelemetryEvent, TelemetryKind,
    TurnChunkSelection,
};
pub use journal::{EventQuery, JournalRecord, SqliteEventJournal};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "dolt_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Whether to persist telemetry events to SQLite.
    pub journal_enabled: bool,
    /// Path to the event journal database.
    pub journal_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            journal_enabled: true,
            journal_db_path: dirs_fallback().join("database/telemetry.db"),
        }
    }
}

/// Handles produced by [`init_telemetry`]. Keep alive for the process lifetime.
pub struct TelemetryGuard {
    bus: TelemetryBus,
    journal: Option<Arc<SqliteEventJournal>>,
}

impl TelemetryGuard {
    /// The bus engine components emit on.
    pub fn bus(&self) -> &TelemetryBus {
        &self.bus
    }

    /// Access the journal for querying persisted events.
    pub fn journal(&self) -> Option<&SqliteEventJournal> {
        self.journal.as_deref()
    }
}

/// Build the filter directive string from config.
fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize logging and the telemetry bus. Call once at startup.
///
/// A second call leaves the existing global subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    // JSON to stderr so CLI output on stdout stays parseable.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    let bus = TelemetryBus::new();
    let journal = if config.journal_enabled {
        match SqliteEventJournal::new(&config.journal_db_path) {
            Ok(journal) => {
                let journal = Arc::new(journal);
                journal.attach(&bus);
                Some(journal)
            }
            Err(e) => {
                tracing::warn!(path = %config.journal_db_path.display(), error = %e, "failed to open telemetry journal");
                None
            }
        }
    } else {
        None
    };

    TelemetryGuard { bus, journal }
}

/// Fallback home dir for default paths.
pub fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".dolt")
}
