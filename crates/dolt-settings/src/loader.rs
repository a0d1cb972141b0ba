//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DoltSettings::default()`]
//! 2. If `~/.dolt/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `DOLT_*` environment variable overrides (highest priority)
//! 4. Validate; malformed lane policies fail the load
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::DoltSettings;

/// Root directory for dolt state (`~/.dolt`).
pub fn dolt_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dolt")
}

/// Resolve the path to the settings file (`~/.dolt/settings.json`).
pub fn settings_path() -> PathBuf {
    dolt_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DoltSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid resulting
/// configuration is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DoltSettings> {
    let defaults = serde_json::to_value(DoltSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DoltSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut DoltSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply `DOLT_*` overrides read through `env`.
pub fn apply_overrides(settings: &mut DoltSettings, env: &dyn Fn(&str) -> Option<String>) {
    // ── Lane policies ───────────────────────────────────────────────
    if let Some(v) = read_env_u64(env, "DOLT_TURN_SOFT", 1, 10_000_000) {
        settings.lanes.turn.soft = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_TURN_DELTA", 0, 10_000_000) {
        settings.lanes.turn.delta = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_TURN_TARGET", 0, 10_000_000) {
        settings.lanes.turn.target = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_LEAF_SOFT", 1, 10_000_000) {
        settings.lanes.leaf.soft = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_LEAF_DELTA", 0, 10_000_000) {
        settings.lanes.leaf.delta = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_LEAF_TARGET", 0, 10_000_000) {
        settings.lanes.leaf.target = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_BINDLE_SOFT", 1, 10_000_000) {
        settings.lanes.bindle.soft = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_BINDLE_DELTA", 0, 10_000_000) {
        settings.lanes.bindle.delta = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_BINDLE_TARGET", 0, 10_000_000) {
        settings.lanes.bindle.target = v;
    }

    // ── Compaction ──────────────────────────────────────────────────
    if let Some(v) = read_env_usize(env, "DOLT_FRESH_TAIL_MIN_TURNS", 0, 10_000) {
        settings.compaction.fresh_tail_min_turns = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_FRESH_TAIL_TOKEN_LIMIT", 0, 10_000_000) {
        settings.compaction.fresh_tail_token_limit = v;
    }
    if let Some(v) = read_env_usize(env, "DOLT_MIN_CHUNK_TURNS", 1, 10_000) {
        settings.compaction.min_chunk_turns = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_BINDLE_EVICTION_TARGET", 0, 10_000_000) {
        settings.compaction.bindle_eviction_target_tokens = Some(v);
    }
    if let Some(v) = read_env_u64(env, "DOLT_SUMMARIZE_TIMEOUT_MS", 1000, 3_600_000) {
        settings.compaction.summarize_timeout_ms = v;
    }

    // ── Hydration ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64(env, "DOLT_TOKEN_BUDGET", 1, 10_000_000) {
        settings.hydration.token_budget = v;
    }
    if let Some(v) = read_env_u64(env, "DOLT_RUNTIME_RESERVE", 0, 10_000_000) {
        settings.hydration.runtime_reserve_tokens = v;
    }

    // ── Storage & logging ───────────────────────────────────────────
    if let Some(v) = read_env_string(env, "DOLT_DB") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string(env, "DOLT_JOURNAL_DB") {
        settings.storage.journal_db_path = v;
    }
    if let Some(v) = read_env_string(env, "DOLT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool(env, "DOLT_JOURNAL_ENABLED") {
        settings.logging.journal_enabled = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(env: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.is_empty())
}

fn read_env_bool(env: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let val = env(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(env: &dyn Fn(&str) -> Option<String>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = env(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(env: &dyn Fn(&str) -> Option<String>, name: &str, min: usize, max: usize) -> Option<usize> {
    let val = env(name)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
