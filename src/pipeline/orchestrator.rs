//! Pipeline Orchestrator
//!
//! Drives one question through the state machine in `state.rs`:
//! intent check, generation, validation, DDL gate, execution with a single
//! regeneration on failure, and summarization. All per-run data lives in
//! `RunContext`; the orchestrator itself only holds shared read-only parts and
//! the executor's pool, so concurrent `run` calls do not interfere.

use crate::config::{Config, SchemaDescription};
use crate::error::{NlqError, Result};
use crate::execution::{MySqlExecutor, QueryExecutor, RowSet};
use crate::llm::{ChatCompletionClient, TextGenerator};
use crate::pipeline::metrics::RunMetrics;
use crate::pipeline::state::StageKind;
use crate::prompts::{DdlVerdict, IntentVerdict, PromptCatalog};
use crate::sql_validator::{SqlValidator, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Regeneration attempts allowed per run.
pub const MAX_REGENERATIONS: u8 = 1;

pub const INVALID_QUERY_MESSAGE: &str = "Invalid query";
pub const DDL_BLOCKED_MESSAGE: &str = "DDL operations not allowed.";
pub const INSUFFICIENT_DATA_MESSAGE: &str =
    "I am unable to answer this question since I do not have enough data.";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub strict_read_only: bool,
    /// Rows shown in the result preview.
    pub preview_rows: usize,
    /// Rows handed to the summarization prompt.
    pub summary_rows: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            strict_read_only: true,
            preview_rows: 5,
            summary_rows: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    Text(String),
    /// The query returned no rows; nothing is made up.
    InsufficientData,
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Text(text) => text,
            Answer::InsufficientData => INSUFFICIENT_DATA_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The model gate answered ERROR.
    ModelGate,
    /// The model gate answered something other than OK or ERROR.
    UnrecognizedGateReply,
    /// The statement is not a plain query.
    ReadOnlyGuard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub sql: String,
    pub rows: RowSet,
    pub preview: String,
    pub answer: Answer,
    pub metrics: RunMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Rejected,
    Blocked { sql: String, reason: BlockReason },
    /// Execution failed again after the one regeneration. `error` is the
    /// database message, unmodified.
    Failed { sql: String, error: String },
    Answered(RunReport),
}

/// What the presentation layer shows: SQL, result preview and metrics text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub sql: String,
    pub result_preview: String,
    pub metrics: String,
}

impl From<&RunOutcome> for RunResponse {
    fn from(outcome: &RunOutcome) -> Self {
        let (sql, result_preview, metrics) = match outcome {
            RunOutcome::Rejected => (INVALID_QUERY_MESSAGE.to_string(), String::new(), String::new()),
            RunOutcome::Blocked { .. } => (DDL_BLOCKED_MESSAGE.to_string(), String::new(), String::new()),
            RunOutcome::Failed { sql, error } => (sql.clone(), format!("Execution failed: {}", error), String::new()),
            RunOutcome::Answered(report) => (report.sql.clone(), report.preview.clone(), report.metrics.to_string()),
        };
        Self {
            sql,
            result_preview,
            metrics,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub question: String,
    pub outcome: RunOutcome,
    /// Every state visited, in order, ending in a terminal one.
    pub trace: Vec<StageKind>,
    /// The executor had no connection, so an empty result means nothing.
    pub degraded: bool,
}

impl PipelineRun {
    pub fn response(&self) -> RunResponse {
        RunResponse::from(&self.outcome)
    }
}

enum Stage {
    IntentCheck,
    Generate,
    Validate,
    DdlGate,
    Execute,
    Regenerate { error: String },
    Summarize { rows: RowSet },
    Rejected,
    Blocked { reason: BlockReason },
    Failed { error: String },
    Done { rows: RowSet, answer: Answer },
}

impl Stage {
    fn kind(&self) -> StageKind {
        match self {
            Stage::IntentCheck => StageKind::IntentCheck,
            Stage::Generate => StageKind::Generate,
            Stage::Validate => StageKind::Validate,
            Stage::DdlGate => StageKind::DdlGate,
            Stage::Execute => StageKind::Execute,
            Stage::Regenerate { .. } => StageKind::Regenerate,
            Stage::Summarize { .. } => StageKind::Summarize,
            Stage::Rejected => StageKind::Rejected,
            Stage::Blocked { .. } => StageKind::Blocked,
            Stage::Failed { .. } => StageKind::Failed,
            Stage::Done { .. } => StageKind::Done,
        }
    }
}

/// Per-run state. Never shared between runs.
struct RunContext<'q> {
    question: &'q str,
    original_sql: Option<String>,
    regenerated_sql: Option<String>,
    report: Option<ValidationReport>,
    generation_time: Duration,
    execution_time: Duration,
    regenerations: u8,
    regeneration_similarity: Option<f64>,
}

impl<'q> RunContext<'q> {
    fn new(question: &'q str) -> Self {
        Self {
            question,
            original_sql: None,
            regenerated_sql: None,
            report: None,
            generation_time: Duration::ZERO,
            execution_time: Duration::ZERO,
            regenerations: 0,
            regeneration_similarity: None,
        }
    }

    /// The candidate that runs next: the regenerated one once it exists.
    fn current_sql(&self) -> &str {
        self.regenerated_sql
            .as_deref()
            .or(self.original_sql.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn TextGenerator>,
    executor: Arc<dyn QueryExecutor>,
    prompts: Arc<PromptCatalog>,
    validator: Arc<SqlValidator>,
    schema: SchemaDescription,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        executor: Arc<dyn QueryExecutor>,
        schema: SchemaDescription,
        forbidden_tokens: &[String],
        options: PipelineOptions,
    ) -> Result<Self> {
        let validator = SqlValidator::new(forbidden_tokens)?;
        let prompts = PromptCatalog::new(&schema, forbidden_tokens);
        Ok(Self {
            llm,
            executor,
            prompts: Arc::new(prompts),
            validator: Arc::new(validator),
            schema,
            options,
        })
    }

    /// Wire the HTTP model client and the MySQL executor from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let llm = ChatCompletionClient::new(&config.llm)?;
        let executor = MySqlExecutor::connect(&config.database).await;
        let options = PipelineOptions {
            strict_read_only: config.strict_read_only,
            ..PipelineOptions::default()
        };
        Self::new(
            Arc::new(llm),
            Arc::new(executor),
            config.schema.clone(),
            &config.forbidden_tokens,
            options,
        )
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    /// Answer one question: (sql, result preview, metrics).
    pub async fn run(&self, question: &str) -> Result<RunResponse> {
        Ok(self.process(question).await?.response())
    }

    /// Full run with typed outcome and state trace. Model transport errors
    /// and database errors outside the regeneration path come back as `Err`.
    pub async fn process(&self, question: &str) -> Result<PipelineRun> {
        let run_id = Uuid::new_v4();
        let span = info_span!("nlq_run", %run_id);
        self.process_inner(run_id, question).instrument(span).await
    }

    async fn process_inner(&self, run_id: Uuid, question: &str) -> Result<PipelineRun> {
        let started_at = Utc::now();
        info!("Processing question: {}", question);

        let mut ctx = RunContext::new(question);
        let mut stage = Stage::IntentCheck;
        let mut trace = vec![StageKind::IntentCheck];

        while !stage.kind().is_terminal() {
            let from = stage.kind();
            let next = self.step(stage, &mut ctx).await?;
            debug!("{:?} -> {:?}", from, next.kind());
            debug_assert!(from.can_transition_to(next.kind()), "illegal transition {:?} -> {:?}", from, next.kind());
            trace.push(next.kind());
            stage = next;
        }

        let outcome = self.finish(stage, &ctx);
        info!("Run finished after {} states: {:?}", trace.len(), trace.last());

        Ok(PipelineRun {
            run_id,
            started_at,
            question: question.to_string(),
            outcome,
            trace,
            degraded: self.executor.is_degraded(),
        })
    }

    async fn step(&self, stage: Stage, ctx: &mut RunContext<'_>) -> Result<Stage> {
        match stage {
            Stage::IntentCheck => self.check_intent(ctx).await,
            Stage::Generate => self.generate(ctx).await,
            Stage::Validate => Ok(self.validate(ctx)),
            Stage::DdlGate => self.ddl_gate(ctx).await,
            Stage::Execute => self.execute(ctx).await,
            Stage::Regenerate { error } => self.regenerate(ctx, &error).await,
            Stage::Summarize { rows } => self.summarize(ctx, rows).await,
            terminal => Ok(terminal),
        }
    }

    async fn check_intent(&self, ctx: &mut RunContext<'_>) -> Result<Stage> {
        if ctx.question.trim().is_empty() {
            info!("Empty question rejected");
            return Ok(Stage::Rejected);
        }

        let verdict = self
            .prompts
            .intent
            .invoke(self.llm.as_ref(), &[("schema", self.schema.as_str()), ("query", ctx.question)])
            .await?;

        match verdict {
            IntentVerdict::Valid => Ok(Stage::Generate),
            IntentVerdict::Invalid => {
                info!("Question rejected by intent check");
                Ok(Stage::Rejected)
            }
            IntentVerdict::Unrecognized(reply) => {
                warn!("Unrecognized intent check reply '{}', rejecting", reply);
                Ok(Stage::Rejected)
            }
        }
    }

    async fn generate(&self, ctx: &mut RunContext<'_>) -> Result<Stage> {
        let start = Instant::now();
        let sql = self
            .prompts
            .generate
            .invoke(self.llm.as_ref(), &[("query", ctx.question)])
            .await?;
        ctx.generation_time = start.elapsed();
        info!("Generated SQL in {:.3}s: {}", ctx.generation_time.as_secs_f64(), sql);
        ctx.original_sql = Some(sql);
        Ok(Stage::Validate)
    }

    fn validate(&self, ctx: &mut RunContext<'_>) -> Stage {
        let report = self.validator.report(ctx.current_sql());
        info!(
            "Validation: syntax_valid={} forbidden_tokens={} complexity={}",
            report.syntax_valid, report.forbidden_token_count, report.complexity_score
        );
        ctx.report = Some(report);
        Stage::DdlGate
    }

    async fn ddl_gate(&self, ctx: &mut RunContext<'_>) -> Result<Stage> {
        let sql = ctx.current_sql();
        let verdict = self.prompts.ddl_gate.invoke(self.llm.as_ref(), &[("sql", sql)]).await?;

        match verdict {
            DdlVerdict::Error => {
                info!("DDL gate blocked the statement");
                Ok(Stage::Blocked { reason: BlockReason::ModelGate })
            }
            DdlVerdict::Unrecognized(reply) => {
                warn!("Unrecognized DDL gate reply '{}', blocking", reply);
                Ok(Stage::Blocked { reason: BlockReason::UnrecognizedGateReply })
            }
            DdlVerdict::Ok => Ok(self.read_only_guard(sql).unwrap_or(Stage::Execute)),
        }
    }

    /// Deterministic second check, only in strict mode.
    fn read_only_guard(&self, sql: &str) -> Option<Stage> {
        if self.options.strict_read_only && !self.validator.is_read_only(sql) {
            warn!("Read-only guard blocked a statement the model gate accepted: {}", sql);
            return Some(Stage::Blocked { reason: BlockReason::ReadOnlyGuard });
        }
        None
    }

    async fn execute(&self, ctx: &mut RunContext<'_>) -> Result<Stage> {
        let start = Instant::now();
        let result = self.executor.execute(ctx.current_sql()).await;
        match result {
            Ok(rows) => {
                ctx.execution_time = start.elapsed();
                info!(
                    "{} returned {} rows in {:.3}s",
                    self.executor.name(),
                    rows.row_count(),
                    ctx.execution_time.as_secs_f64()
                );
                Ok(Stage::Summarize { rows })
            }
            Err(NlqError::Execution(error)) => {
                warn!("Execution failed: {}", error);
                if ctx.regenerations < MAX_REGENERATIONS {
                    Ok(Stage::Regenerate { error })
                } else {
                    Ok(Stage::Failed { error })
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn regenerate(&self, ctx: &mut RunContext<'_>, error: &str) -> Result<Stage> {
        ctx.regenerations += 1;
        let original = ctx.original_sql.clone().unwrap_or_default();
        let sql = self
            .prompts
            .regenerate
            .invoke(
                self.llm.as_ref(),
                &[("sql", original.as_str()), ("schema", self.schema.as_str()), ("error", error)],
            )
            .await?;
        info!("Regenerated SQL: {}", sql);

        ctx.regeneration_similarity = Some(self.validator.compute_similarity(&original, &sql));
        ctx.report = Some(self.validator.report(&sql));
        let blocked = self.read_only_guard(&sql);
        ctx.regenerated_sql = Some(sql);

        Ok(blocked.unwrap_or(Stage::Execute))
    }

    async fn summarize(&self, ctx: &mut RunContext<'_>, rows: RowSet) -> Result<Stage> {
        if rows.is_empty() {
            if self.executor.is_degraded() {
                warn!("Empty result because the database is unavailable");
            }
            return Ok(Stage::Done { rows, answer: Answer::InsufficientData });
        }

        let table = rows.render(self.options.summary_rows);
        let text = self
            .prompts
            .summarize
            .invoke(
                self.llm.as_ref(),
                &[("query", ctx.question), ("sql_query", ctx.current_sql()), ("db_result", table.as_str())],
            )
            .await?;

        Ok(Stage::Done { rows, answer: Answer::Text(text) })
    }

    fn finish(&self, stage: Stage, ctx: &RunContext<'_>) -> RunOutcome {
        let sql = ctx.current_sql().to_string();
        match stage {
            Stage::Blocked { reason } => RunOutcome::Blocked { sql, reason },
            Stage::Failed { error } => RunOutcome::Failed { sql, error },
            Stage::Done { rows, answer } => {
                let metrics = RunMetrics {
                    generation_time: ctx.generation_time,
                    execution_time: ctx.execution_time,
                    rows_returned: rows.row_count(),
                    columns: rows.column_count(),
                    validation: ctx.report.unwrap_or_else(|| self.validator.report(&sql)),
                    regeneration_similarity: ctx.regeneration_similarity,
                };
                RunOutcome::Answered(RunReport {
                    preview: rows.render(self.options.preview_rows),
                    sql,
                    rows,
                    answer,
                    metrics,
                })
            }
            Stage::Rejected => RunOutcome::Rejected,
            other => unreachable!("run loop exited on non-terminal stage {:?}", other.kind()),
        }
    }
}
