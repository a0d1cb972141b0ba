//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production values, and `#[serde(default)]` lets partial
//! JSON fill in the rest.

mod compaction;
mod storage;

pub use compaction::*;
pub use storage::*;

use dolt_core::LanePolicies;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded from `~/.dolt/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "lanes": { "turn": { "soft": 50000, "delta": 5000, "target": 45000 } },
///   "hydration": { "tokenBudget": 64000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoltSettings {
    /// Settings schema version.
    pub version: String,
    /// Per-level pressure thresholds.
    pub lanes: LanePolicies,
    /// Normal-path compaction tuning.
    pub compaction: CompactionSettings,
    /// Reset finalization floors and limits.
    pub reset: ResetSettings,
    /// Session start assembly budget.
    pub hydration: HydrationSettings,
    /// Database locations.
    pub storage: StorageSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for DoltSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            lanes: LanePolicies::default(),
            compaction: CompactionSettings::default(),
            reset: ResetSettings::default(),
            hydration: HydrationSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl DoltSettings {
    /// Reject settings the engine cannot run with. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        self.lanes.validate()?;
        if self.compaction.min_chunk_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "compaction.minChunkTurns must be at least 1".into(),
            ));
        }
        if self.compaction.leaf_rollup_min_leaves < 2 {
            return Err(SettingsError::InvalidValue(
                "compaction.leafRollupMinLeaves must be at least 2".into(),
            ));
        }
        if self.compaction.summarize_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "compaction.summarizeTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.reset.min_turn_source_floor == 0 || self.reset.min_leaf_source_floor == 0 {
            return Err(SettingsError::InvalidValue(
                "reset source floors must be at least 1".into(),
            ));
        }
        if self.reset.max_compaction_passes == 0 {
            return Err(SettingsError::InvalidValue(
                "reset.maxCompactionPasses must be at least 1".into(),
            ));
        }
        if self.hydration.runtime_reserve_tokens > self.hydration.token_budget {
            return Err(SettingsError::InvalidValue(format!(
                "hydration.runtimeReserveTokens ({}) exceeds tokenBudget ({})",
                self.hydration.runtime_reserve_tokens, self.hydration.token_budget
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolt_core::LanePolicy;

    #[test]
    fn defaults_validate() {
        DoltSettings::default().validate().unwrap();
    }

    #[test]
    fn json_uses_camel_case() {
        let json = serde_json::to_value(DoltSettings::default()).unwrap();
        assert_eq!(json["lanes"]["turn"]["soft"], 40_000);
        assert_eq!(json["compaction"]["freshTailMinTurns"], 4);
        assert_eq!(json["reset"]["maxCompactionPasses"], 256);
        assert_eq!(json["hydration"]["runtimeReserveTokens"], 4_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: DoltSettings =
            serde_json::from_str(r#"{"compaction": {"minChunkTurns": 3}}"#).unwrap();
        assert_eq!(settings.compaction.min_chunk_turns, 3);
        assert_eq!(settings.compaction.fresh_tail_min_turns, 4);
        assert_eq!(settings.lanes, LanePolicies::default());
    }

    #[test]
    fn bad_lane_policy_is_rejected() {
        let mut settings = DoltSettings::default();
        settings.lanes.leaf = LanePolicy::new(1_000, 100, 2_000);
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidPolicy(_)));
        assert!(err.to_string().contains("leaf"));
    }

    #[test]
    fn reserve_above_budget_is_rejected() {
        let mut settings = DoltSettings::default();
        settings.hydration.runtime_reserve_tokens = settings.hydration.token_budget + 1;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn zero_floors_are_rejected() {
        let mut settings = DoltSettings::default();
        settings.reset.min_leaf_source_floor = 0;
        assert!(settings.validate().is_err());
    }
}
