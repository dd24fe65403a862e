use nlq_sql::config::{parse_token_list, Config, DEFAULT_FORBIDDEN_TOKENS};
use nlq_sql::pipeline::{Orchestrator, PipelineRun, RunOutcome};
use nlq_sql::sql_validator::SqlValidator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Ask the supply-chain database questions in plain English")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Default)]
struct ModelArgs {
    /// API key for the model endpoint (or set OPENROUTER_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Model identifier (or set NLQ_LLM_MODEL env var)
    #[arg(long)]
    model: Option<String>,

    /// Chat completions URL (or set NLQ_LLM_ENDPOINT env var)
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        /// The question in natural language
        question: String,

        /// Print the full run (outcome, trace, metrics) as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        model: ModelArgs,
    },
    /// Ask questions interactively until EOF or "exit"
    Repl {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Run the static SQL checks on a statement, no model or database needed
    Validate {
        /// SQL statement to check
        sql: String,

        /// Comma-separated forbidden tokens (default: insert,update,delete,drop,create,alter)
        #[arg(long)]
        forbidden_tokens: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Ask { question, json, model } => ask(question, json, model).await,
        Commands::Repl { model } => repl(model).await,
        Commands::Validate { sql, forbidden_tokens } => validate(sql, forbidden_tokens),
    }
}

fn load_config(model: &ModelArgs) -> Result<Config> {
    let mut overrides: HashMap<&str, String> = HashMap::new();
    if let Some(key) = &model.api_key {
        overrides.insert("OPENROUTER_API_KEY", key.clone());
    }
    if let Some(name) = &model.model {
        overrides.insert("NLQ_LLM_MODEL", name.clone());
    }
    if let Some(url) = &model.endpoint {
        overrides.insert("NLQ_LLM_ENDPOINT", url.clone());
    }

    Config::from_lookup(|key| overrides.get(key).cloned().or_else(|| std::env::var(key).ok()))
        .map_err(|e| anyhow::anyhow!("{}", e))
}

async fn build_orchestrator(model: &ModelArgs) -> Result<Orchestrator> {
    let config = load_config(model)?;
    info!("Using model {} at {}", config.llm.model, config.llm.endpoint);
    Orchestrator::from_config(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start pipeline: {}", e))
}

async fn ask(question: String, json: bool, model: ModelArgs) -> Result<()> {
    let orchestrator = build_orchestrator(&model).await?;
    let run = orchestrator
        .process(&question)
        .await
        .map_err(|e| anyhow::anyhow!("Run failed: {}", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }
    Ok(())
}

async fn repl(model: ModelArgs) -> Result<()> {
    let orchestrator = build_orchestrator(&model).await?;
    let stdin = io::stdin();

    loop {
        print!("Ask your query: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        match orchestrator.process(question).await {
            Ok(run) => print_run(&run),
            Err(e) => {
                error!("Run failed: {}", e);
                println!("\n Error: {}\n", e);
            }
        }
    }
    Ok(())
}

fn validate(sql: String, forbidden_tokens: Option<String>) -> Result<()> {
    let tokens: Vec<String> = match forbidden_tokens {
        Some(list) => parse_token_list(&list).map_err(|e| anyhow::anyhow!("--forbidden-tokens: {}", e))?,
        None => DEFAULT_FORBIDDEN_TOKENS.iter().map(|t| t.to_string()).collect(),
    };
    let validator = SqlValidator::new(&tokens).map_err(|e| anyhow::anyhow!("{}", e))?;
    let sql = nlq_sql::sql_validator::strip_code_fences(&sql);
    let report = validator.report(&sql);

    println!("SQL: {}", sql);
    println!("Syntax Valid: {}", if report.syntax_valid { "True" } else { "False" });
    println!("Forbidden Tokens: {}", report.forbidden_token_count);
    println!("Query Complexity: {}", report.complexity_score);
    println!("Read Only: {}", if validator.is_read_only(&sql) { "True" } else { "False" });
    Ok(())
}

fn print_run(run: &PipelineRun) {
    let response = run.response();

    println!("\n{}", "=".repeat(80));
    println!(" {}", run.question);
    println!("{}", "=".repeat(80));

    match &run.outcome {
        RunOutcome::Rejected | RunOutcome::Blocked { .. } => {
            println!("\n {}\n", response.sql);
        }
        RunOutcome::Failed { .. } => {
            println!("\n SQL:\n{}\n", response.sql);
            println!(" {}\n", response.result_preview);
        }
        RunOutcome::Answered(report) => {
            println!("\n SQL:\n{}\n", response.sql);
            println!(" Result:\n{}\n", response.result_preview);
            println!(" Answer:\n{}\n", report.answer.text());
            println!("{}", "-".repeat(80));
            println!("{}", response.metrics);
            if run.degraded {
                println!("\n Warning: database unavailable, results are empty");
            }
        }
    }
}
