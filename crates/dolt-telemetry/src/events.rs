use serde::{Deserialize, Serialize};

use dolt_core::{PerLevel, PressureTrigger, RecordLevel, SessionId, SummaryMode};

/// One decision-point observation. Operators consume these; the engine
/// never reads them back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub emitted_at_ms: i64,
    #[serde(flatten)]
    pub kind: TelemetryKind,
}

impl TelemetryEvent {
    pub fn new(session_id: &SessionId, session_key: Option<&str>, kind: TelemetryKind) -> Self {
        Self {
            session_id: Some(session_id.clone()),
            session_key: session_key.map(str::to_owned),
            emitted_at_ms: dolt_core::now_ms(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum TelemetryKind {
    #[serde(rename = "dolt_lane_pressure_decision")]
    LanePressureDecision(LanePressureDecision),
    #[serde(rename = "dolt_turn_chunk_selection")]
    TurnChunkSelection(TurnChunkSelection),
    #[serde(rename = "dolt_rollup_summary_quality")]
    RollupSummaryQuality(SummaryQuality),
    #[serde(rename = "dolt_bindle_eviction")]
    BindleEviction(BindleEviction),
    #[serde(rename = "dolt_rollup_completed")]
    RollupCompleted(RollupCompleted),
    #[serde(rename = "dolt_assembly_snapshot")]
    AssemblySnapshot(AssemblySnapshot),
    #[serde(rename = "dolt_bootstrap_hydration")]
    BootstrapHydration(BootstrapHydration),
    #[serde(rename = "dolt_reset_summary_quality")]
    ResetSummaryQuality(SummaryQuality),
    #[serde(rename = "dolt_reset_finalization_completed")]
    ResetFinalizationCompleted(ResetFinalizationCompleted),
}

impl TelemetryKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LanePressureDecision(_) => "dolt_lane_pressure_decision",
            Self::TurnChunkSelection(_) => "dolt_turn_chunk_selection",
            Self::RollupSummaryQuality(_) => "dolt_rollup_summary_quality",
            Self::BindleEviction(_) => "dolt_bindle_eviction",
            Self::RollupCompleted(_) => "dolt_rollup_completed",
            Self::AssemblySnapshot(_) => "dolt_assembly_snapshot",
            Self::BootstrapHydration(_) => "dolt_bootstrap_hydration",
            Self::ResetSummaryQuality(_) => "dolt_reset_summary_quality",
            Self::ResetFinalizationCompleted(_) => "dolt_reset_finalization_completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanePressureDecision {
    pub level: RecordLevel,
    pub trigger: PressureTrigger,
    pub lane_token_count: u64,
    pub soft: u64,
    pub delta: u64,
    pub target: u64,
    pub hard_limit_safety_mode: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnChunkSelection {
    pub turn_count: u64,
    pub selected_count: u64,
    pub fresh_tail_preserved_count: u64,
    pub selected_token_count: u64,
    pub fresh_tail_token_count: u64,
    pub lane_token_count: u64,
    pub projected_lane_token_count: u64,
    pub fresh_tail_min_turns: u64,
    pub fresh_tail_token_limit: u64,
    pub min_chunk_turns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_selected_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_selected_pointer: Option<String>,
}

/// Shape shared by the rollup and reset summary-quality events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryQuality {
    pub summary_mode: SummaryMode,
    pub target_level: RecordLevel,
    pub source_record_count: u64,
    pub source_turn_count: u64,
    pub source_leaf_count: u64,
    pub source_token_total: u64,
    pub source_token_min: u64,
    pub source_token_max: u64,
    pub summary_token_count: u64,
    pub reset_forced_summary_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindleEviction {
    pub before_active_count: u64,
    pub after_active_count: u64,
    pub evicted_count: u64,
    pub evicted_token_total: u64,
    pub eviction_target_tokens: u64,
    pub oldest_evicted_pointer: String,
    pub newest_evicted_pointer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupCompleted {
    pub target_level: RecordLevel,
    pub summary_mode: SummaryMode,
    pub parent_pointer: String,
    pub child_pointer_count: u64,
    pub bindle_eviction_count: u64,
    pub lane_active_record_counts_before: PerLevel<u64>,
    pub lane_active_record_counts_after: PerLevel<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblySnapshot {
    pub token_budget: u64,
    pub runtime_reserve_tokens: u64,
    pub effective_budget: u64,
    pub selected_token_total: u64,
    pub lane_active_token_totals: PerLevel<u64>,
    pub lane_selected_record_counts: PerLevel<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapHydration {
    pub hydrated: bool,
    pub activated_pointer_counts: PerLevel<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetFinalizationCompleted {
    pub ingested_tail_count: u64,
    pub turn_to_leaf_rollups: u64,
    pub leaf_to_bindle_rollups: u64,
    pub turn_to_leaf_convergence_loops: u64,
    pub leaf_to_bindle_convergence_loops: u64,
    pub short_bindle_created: bool,
    pub short_bindle_created_count: u64,
    pub residual_turn_count: u64,
    pub residual_leaf_count: u64,
    pub lane_active_record_counts: PerLevel<u64>,
    pub lane_active_token_totals: PerLevel<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hydration_event() -> TelemetryEvent {
        TelemetryEvent::new(
            &SessionId::from_raw("s1"),
            Some("agent:main"),
            TelemetryKind::BootstrapHydration(BootstrapHydration {
                hydrated: true,
                activated_pointer_counts: PerLevel {
                    turn: 2,
                    leaf: 0,
                    bindle: 1,
                },
            }),
        )
    }

    #[test]
    fn wire_shape_is_tagged_by_event_type() {
        let json = serde_json::to_value(hydration_event()).unwrap();
        assert_eq!(json["event_type"], "dolt_bootstrap_hydration");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["session_key"], "agent:main");
        assert_eq!(json["payload"]["hydrated"], true);
        assert_eq!(json["payload"]["activated_pointer_counts"]["bindle"], 1);
    }

    #[test]
    fn parses_back_from_wire() {
        let evt = hydration_event();
        let json = serde_json::to_string(&evt).unwrap();
        let parsed: TelemetryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, evt);
    }

    #[test]
    fn event_type_names() {
        let evt = TelemetryEvent::new(
            &SessionId::from_raw("s1"),
            None,
            TelemetryKind::LanePressureDecision(LanePressureDecision {
                level: RecordLevel::Turn,
                trigger: PressureTrigger::SoftDelta,
                lane_token_count: 45_000,
                soft: 40_000,
                delta: 4_000,
                target: 36_000,
                hard_limit_safety_mode: false,
            }),
        );
        assert_eq!(evt.event_type(), "dolt_lane_pressure_decision");
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["payload"]["trigger"], "soft_delta");
        assert!(json.get("session_key").is_none());
    }
}
