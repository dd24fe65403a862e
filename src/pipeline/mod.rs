//! Question → SQL → answer pipeline.

pub mod metrics;
pub mod orchestrator;
pub mod state;

pub use metrics::RunMetrics;
pub use orchestrator::{
    Answer, BlockReason, Orchestrator, PipelineOptions, PipelineRun, RunOutcome, RunReport, RunResponse,
};
pub use state::StageKind;
