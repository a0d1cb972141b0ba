//! Lane pressure evaluation. Pure functions; the caller decides what to do
//! with a trigger.

use serde::{Deserialize, Serialize};

use dolt_core::{LanePolicies, LanePolicy, PolicyError, PressureTrigger, RecordLevel, SessionId};
use dolt_telemetry::events::{LanePressureDecision, TelemetryKind};
use dolt_telemetry::{TelemetryBus, TelemetryEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PressureDecision {
    pub trigger: PressureTrigger,
    pub lane_token_count: u64,
    pub policy: LanePolicy,
    pub hard_limit_safety_mode: bool,
}

impl PressureDecision {
    pub fn is_triggered(&self) -> bool {
        self.trigger.is_triggered()
    }
}

/// The safety flag wins over the counters: the caller knows the real
/// request is about to overflow.
pub fn evaluate_lane_pressure(
    lane_token_count: u64,
    policy: &LanePolicy,
    hard_limit_safety_mode: bool,
) -> PressureDecision {
    let trigger = if hard_limit_safety_mode {
        PressureTrigger::HardLimitBypass
    } else if lane_token_count > policy.soft {
        PressureTrigger::SoftDelta
    } else {
        PressureTrigger::None
    };
    PressureDecision {
        trigger,
        lane_token_count,
        policy: *policy,
        hard_limit_safety_mode,
    }
}

/// Publish a `dolt_lane_pressure_decision` event. `None` triggers are silent.
pub fn emit_lane_pressure_decision(
    bus: &TelemetryBus,
    session_id: &SessionId,
    session_key: Option<&str>,
    level: RecordLevel,
    decision: &PressureDecision,
) {
    if !decision.is_triggered() {
        return;
    }
    bus.emit(TelemetryEvent::new(
        session_id,
        session_key,
        TelemetryKind::LanePressureDecision(LanePressureDecision {
            level,
            trigger: decision.trigger,
            lane_token_count: decision.lane_token_count,
            soft: decision.policy.soft,
            delta: decision.policy.delta,
            target: decision.policy.target,
            hard_limit_safety_mode: decision.hard_limit_safety_mode,
        }),
    ));
}

/// Partial override for one lane. Unset fields keep the default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePolicyOverride {
    pub soft: Option<u64>,
    pub delta: Option<u64>,
    pub target: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePolicyOverrides {
    pub turn: Option<LanePolicyOverride>,
    pub leaf: Option<LanePolicyOverride>,
    pub bindle: Option<LanePolicyOverride>,
}

/// Apply `overrides` onto the default policies and validate the result.
pub fn resolve_lane_policies(overrides: &LanePolicyOverrides) -> Result<LanePolicies, PolicyError> {
    let mut policies = LanePolicies::default();
    for (slot, over) in [
        (&mut policies.turn, overrides.turn),
        (&mut policies.leaf, overrides.leaf),
        (&mut policies.bindle, overrides.bindle),
    ] {
        if let Some(over) = over {
            *slot = LanePolicy::new(
                over.soft.unwrap_or(slot.soft),
                over.delta.unwrap_or(slot.delta),
                over.target.unwrap_or(slot.target),
            );
        }
    }
    policies.validate()?;
    Ok(policies)
}
