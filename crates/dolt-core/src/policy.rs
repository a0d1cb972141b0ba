use serde::{Deserialize, Serialize};

use crate::level::RecordLevel;

/// Token thresholds for one lane.
///
/// `soft` is where pressure starts, `delta` is the extra margin before the
/// hard ceiling, and `target` is what a rollup should bring the lane down to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePolicy {
    pub soft: u64,
    pub delta: u64,
    pub target: u64,
}

impl LanePolicy {
    pub const fn new(soft: u64, delta: u64, target: u64) -> Self {
        Self { soft, delta, target }
    }

    /// Token count at which the lane is considered at its hard ceiling.
    pub fn hard_limit(&self) -> u64 {
        self.soft.saturating_add(self.delta)
    }

    /// Reject malformed policies. Values are never clamped.
    pub fn validate(&self, level: RecordLevel) -> Result<(), PolicyError> {
        if self.soft == 0 {
            return Err(PolicyError {
                level,
                reason: "soft threshold must be greater than zero".into(),
            });
        }
        if self.target > self.soft {
            return Err(PolicyError {
                level,
                reason: format!("target ({}) exceeds soft ({})", self.target, self.soft),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {level} lane policy: {reason}")]
pub struct PolicyError {
    pub level: RecordLevel,
    pub reason: String,
}

/// One policy per level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePolicies {
    pub turn: LanePolicy,
    pub leaf: LanePolicy,
    pub bindle: LanePolicy,
}

impl Default for LanePolicies {
    fn default() -> Self {
        Self {
            turn: LanePolicy::new(40_000, 4_000, 36_000),
            leaf: LanePolicy::new(20_000, 2_000, 18_000),
            bindle: LanePolicy::new(10_000, 1_000, 9_000),
        }
    }
}

impl LanePolicies {
    pub fn for_level(&self, level: RecordLevel) -> &LanePolicy {
        match level {
            RecordLevel::Turn => &self.turn,
            RecordLevel::Leaf => &self.leaf,
            RecordLevel::Bindle => &self.bindle,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for level in RecordLevel::ALL {
            self.for_level(level).validate(level)?;
        }
        Ok(())
    }
}

/// Why a lane must compact now.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureTrigger {
    None,
    SoftDelta,
    HardLimitBypass,
}

impl PressureTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SoftDelta => "soft_delta",
            Self::HardLimitBypass => "hard_limit_bypass",
        }
    }

    pub fn is_triggered(&self) -> bool {
        !matches!(self, Self::None)
    }
}
