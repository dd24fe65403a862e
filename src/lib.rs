//! Natural-language questions over the supply-chain database, answered with
//! validated read-only SQL.

pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod sql_validator;

pub use config::Config;
pub use error::{NlqError, Result};
pub use pipeline::{Orchestrator, PipelineRun, RunOutcome, RunResponse};
