use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::Level;

use dolt_core::{RecordLevel, SessionId};
use dolt_engine::{ContextEngine, EngineConfig, ExtractiveSummarizer};
use dolt_settings::{dolt_home, init_settings, load_settings_from_path, settings_path, DoltSettings};
use dolt_store::{BootstrapRequest, BootstrapSource, DoltStore};
use dolt_telemetry::{init_telemetry, EventQuery, SqliteEventJournal, TelemetryConfig};

#[derive(Parser)]
#[command(name = "dolt", version, about = "Inspect and drive Dolt context compaction")]
struct Cli {
    /// Record database (defaults to the configured storage path).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Settings file (defaults to `~/.dolt/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show active lane counts, token totals and pointers for a session.
    Inspect {
        #[arg(long)]
        session: String,
    },
    /// Import a session transcript (JSONL) into an empty session.
    Bootstrap {
        #[arg(long)]
        session: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        jsonl: PathBuf,
    },
    /// Assemble the context a resumed session would load.
    Hydrate {
        #[arg(long)]
        session: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        budget: Option<u64>,
        #[arg(long)]
        reserve: Option<u64>,
        /// Print the rendered context instead of the summary.
        #[arg(long)]
        render: bool,
    },
    /// Run one compaction pass with the extractive summarizer.
    Compact {
        #[arg(long)]
        session: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        hard_limit: bool,
    },
    /// Fold every active turn and leaf of a session into bindles.
    Reset {
        #[arg(long)]
        session: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Query the telemetry journal.
    Events {
        #[arg(long)]
        session: Option<String>,
        #[arg(long = "type")]
        event_type: Option<String>,
        #[arg(long)]
        since_ms: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_cli_settings(cli.settings.as_deref())?;

    let telemetry = init_telemetry(telemetry_config(&settings));
    if init_settings(settings.clone()).is_err() {
        tracing::debug!("global settings already initialized");
    }

    let db_path = cli.db.clone().unwrap_or_else(|| resolve_path(&settings.storage.db_path, "dolt.db"));

    if let Command::Events {
        session,
        event_type,
        since_ms,
        limit,
    } = &cli.command
    {
        let journal_path = resolve_path(&settings.storage.journal_db_path, "telemetry.db");
        let journal = SqliteEventJournal::new(&journal_path)
            .with_context(|| format!("open journal {}", journal_path.display()))?;
        let rows = journal.query(&EventQuery {
            session_id: session.clone(),
            event_type: event_type.clone(),
            since_ms: *since_ms,
            limit: Some(*limit),
        })?;
        for row in rows {
            println!("{}", row.payload);
        }
        return Ok(());
    }

    let store = DoltStore::open(&db_path).with_context(|| format!("open store {}", db_path.display()))?;
    let engine = ContextEngine::new(
        store,
        telemetry.bus().clone(),
        Arc::new(ExtractiveSummarizer::new()),
        EngineConfig::from_settings(&settings),
    )?;

    match cli.command {
        Command::Inspect { session } => inspect(&engine, &SessionId::from_raw(session))?,
        Command::Bootstrap { session, key, jsonl } => {
            let result = engine
                .bootstrap_session(&BootstrapRequest {
                    session_id: SessionId::from_raw(session),
                    session_key: key,
                    source: BootstrapSource::Jsonl(jsonl),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Hydrate {
            session,
            key,
            budget,
            reserve,
            render,
        } => {
            let hydration = &engine.config().hydration;
            let snapshot = engine
                .hydrate_with_budget(
                    &SessionId::from_raw(session),
                    key.as_deref(),
                    budget.unwrap_or(hydration.token_budget),
                    reserve.unwrap_or(hydration.runtime_reserve_tokens),
                )
                .await?;
            if render {
                println!("{}", snapshot.render());
            } else {
                let output = json!({
                    "effectiveBudget": snapshot.effective_budget,
                    "selectedTokenTotal": snapshot.selected_token_total,
                    "selectedCounts": snapshot.selected_counts(),
                    "reconciled": snapshot.reconciled,
                    "bindles": snapshot.pointers(RecordLevel::Bindle),
                    "leaves": snapshot.pointers(RecordLevel::Leaf),
                    "turns": snapshot.pointers(RecordLevel::Turn),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Command::Compact {
            session,
            key,
            hard_limit,
        } => {
            let outcome = engine
                .compact_if_needed(&SessionId::from_raw(session), key.as_deref(), hard_limit)
                .await?;
            let output = json!({
                "turnTrigger": outcome.turn_decision.trigger,
                "leafTrigger": outcome.leaf_decision.trigger,
                "leaf": outcome.leaf_rollup.map(|r| r.parent.pointer),
                "bindle": outcome.bindle_rollup.map(|r| r.parent.pointer),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Reset { session, key } => {
            let result = engine
                .finalize_reset(&SessionId::from_raw(session), key.as_deref(), async {
                    Ok::<u64, Infallible>(0)
                })
                .await?;
            let output = json!({
                "turnToLeafRollups": result.turn_to_leaf_rollups,
                "leafToBindleRollups": result.leaf_to_bindle_rollups,
                "shortBindle": result.short_bindle_pointer,
                "activeBindles": result.active_after.bindle,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Events { .. } => {}
    }
    Ok(())
}

fn inspect(engine: &ContextEngine, session_id: &SessionId) -> Result<()> {
    let store = engine.store();
    let lanes = store.lane_snapshot(session_id)?;
    let mut pointers = serde_json::Map::new();
    for level in RecordLevel::ALL {
        let active: Vec<String> = store
            .list_active_records(session_id, level)?
            .into_iter()
            .map(|r| r.pointer)
            .collect();
        pointers.insert(level.to_string(), json!(active));
    }
    let output = json!({
        "sessionId": session_id.as_str(),
        "records": store.count_session_records(session_id)?,
        "activeCounts": lanes.active_counts,
        "activeTokens": lanes.active_tokens,
        "active": pointers,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Load and validate settings. A bad file or lane policy stops the CLI.
fn load_cli_settings(path: Option<&Path>) -> Result<DoltSettings> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(settings_path);
    load_settings_from_path(&path).with_context(|| format!("load settings {}", path.display()))
}

fn telemetry_config(settings: &DoltSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: settings.logging.level.parse().unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        journal_enabled: settings.logging.journal_enabled,
        journal_db_path: resolve_path(&settings.storage.journal_db_path, "telemetry.db"),
    }
}

/// Empty configured paths land under `~/.dolt/database/`.
fn resolve_path(configured: &str, default_name: &str) -> PathBuf {
    if configured.is_empty() {
        dolt_home().join("database").join(default_name)
    } else {
        Path::new(configured).to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_paths_resolve_under_home() {
        assert!(resolve_path("", "dolt.db").ends_with(".dolt/database/dolt.db"));
        assert_eq!(resolve_path("/var/dolt.db", "dolt.db"), PathBuf::from("/var/dolt.db"));
    }

    #[test]
    fn cli_parses_hydrate_flags() {
        let cli = Cli::try_parse_from([
            "dolt", "--db", "/tmp/x.db", "hydrate", "--session", "s1", "--budget", "1000", "--render",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Command::Hydrate {
                session,
                budget,
                reserve,
                render,
                ..
            } => {
                assert_eq!(session, "s1");
                assert_eq!(budget, Some(1_000));
                assert_eq!(reserve, None);
                assert!(render);
            }
            _ => panic!("expected hydrate"),
        }
    }

    #[test]
    fn invalid_lane_policy_fails_settings_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"lanes":{"turn":{"soft":1000,"delta":100,"target":5000}}}"#).unwrap();

        let err = load_cli_settings(Some(&path)).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("exceeds soft"), "{message}");
    }

    #[test]
    fn valid_settings_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"lanes":{"turn":{"soft":50000,"target":45000}}}"#).unwrap();

        let settings = load_cli_settings(Some(&path)).unwrap();
        assert_eq!(settings.lanes.turn.soft, 50_000);
    }

    #[test]
    fn bad_log_level_falls_back_to_info() {
        let mut settings = DoltSettings::default();
        settings.logging.level = "loud".into();
        assert_eq!(telemetry_config(&settings).log_level, Level::INFO);
    }
}
