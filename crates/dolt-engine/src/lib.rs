pub mod engine;
pub mod error;
pub mod hydrate;
pub mod policy;
pub mod reset;
pub mod rollup;
pub mod selector;
pub mod summarizer;

#[cfg(test)]
mod test_support;

pub use engine::{CompactionOutcome, ContextEngine, EngineConfig, TurnInput};
pub use error::EngineError;
pub use hydrate::{AssemblySnapshot, BootstrapHydrator};
pub use policy::{
    emit_lane_pressure_decision, evaluate_lane_pressure, resolve_lane_policies, LanePolicyOverride,
    LanePolicyOverrides, PressureDecision,
};
pub use reset::{ResetFinalizer, ResetResult};
pub use rollup::{RollupExecutor, RollupRequest, RollupResult};
pub use selector::{emit_turn_chunk_selection, select_turn_chunk, TurnChunkParams, TurnChunkSelection};
pub use summarizer::{
    ExtractiveSummarizer, SummarizeParams, SummarizeResult, Summarizer, SummarizerError, SummarySource,
};
