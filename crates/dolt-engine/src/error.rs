use std::time::Duration;

use dolt_core::PolicyError;
use dolt_store::StoreError;

use crate::summarizer::SummarizerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("summarizer error: {0}")]
    Summarizer(#[from] SummarizerError),

    #[error("summarize timeout after {0:?}")]
    SummarizeTimeout(Duration),

    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),

    #[error("invalid rollup: {0}")]
    InvalidRollup(String),

    #[error("reset finalization exceeded max compaction passes ({passes}) for {lane}")]
    ConvergenceLimit { lane: &'static str, passes: u32 },

    #[error("tail ingest failed: {0}")]
    Ingest(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
