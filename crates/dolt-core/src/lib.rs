pub mod ids;
pub mod level;
pub mod policy;
pub mod record;
pub mod tokens;

pub use ids::SessionId;
pub use level::{PerLevel, RecordLevel};
pub use policy::{LanePolicies, LanePolicy, PolicyError, PressureTrigger};
pub use record::{
    ActiveLaneEntry, DatesCovered, LaneUpsert, LineageEdge, ModelSelection, NewRecord, Record,
    SummaryFrontmatter, SummaryMode, SummaryPayload,
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
