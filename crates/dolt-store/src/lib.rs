pub mod bootstrap;
pub mod database;
pub mod error;
pub mod lanes;
pub mod lineage;
pub mod records;
pub mod rollup;
pub mod row_helpers;
pub mod schema;
mod store;

pub use bootstrap::{
    BootstrapOrigin, BootstrapRequest, BootstrapResult, BootstrapSkipReason, BootstrapSource,
    HistoryTurn,
};
pub use database::Database;
pub use error::StoreError;
pub use lanes::LaneSnapshot;
pub use records::ListRecordsOptions;
pub use rollup::{RollupCommit, RollupCommitOutcome};
pub use store::{DoltStore, UpsertOutcome};
