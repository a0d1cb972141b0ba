//! Compaction, reset and hydration tuning.

use serde::{Deserialize, Serialize};

/// Normal-path compaction settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    /// Newest turns that a rollup never touches.
    pub fresh_tail_min_turns: usize,
    /// Token ceiling the unselected tail should fit under.
    pub fresh_tail_token_limit: u64,
    /// Smallest chunk worth summarizing.
    pub min_chunk_turns: usize,
    /// Leaves required before a leaf→bindle rollup runs.
    pub leaf_rollup_min_leaves: usize,
    /// Active bindle token budget enforced after bindle rollups.
    /// Falls back to the bindle lane target when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindle_eviction_target_tokens: Option<u64>,
    /// Upper bound on one summarizer call.
    pub summarize_timeout_ms: u64,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            fresh_tail_min_turns: 4,
            fresh_tail_token_limit: 8_000,
            min_chunk_turns: 2,
            leaf_rollup_min_leaves: 2,
            bindle_eviction_target_tokens: None,
            summarize_timeout_ms: 60_000,
        }
    }
}

/// Reset finalization settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetSettings {
    /// Minimum turns per forced turn→leaf rollup.
    pub min_turn_source_floor: usize,
    /// Leaves consumed per forced leaf→bindle rollup.
    pub min_leaf_source_floor: usize,
    /// Bound on each convergence loop.
    pub max_compaction_passes: u32,
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            min_turn_source_floor: 2,
            min_leaf_source_floor: 2,
            max_compaction_passes: 256,
        }
    }
}

/// Context assembly budget at session start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HydrationSettings {
    pub token_budget: u64,
    /// Tokens held back for the runtime (system prompt, tools, reply).
    pub runtime_reserve_tokens: u64,
}

impl Default for HydrationSettings {
    fn default() -> Self {
        Self {
            token_budget: 64_000,
            runtime_reserve_tokens: 4_000,
        }
    }
}
