//! Runtime configuration
//!
//! Everything is read from the environment (after `.env` has been loaded by the
//! binary). Required values are checked up front so a missing credential fails
//! here instead of as a confusing HTTP 401 or connection error later on.

use crate::error::{NlqError, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LLM_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "meta-llama/llama-3.3-8b-instruct:free";
pub const DEFAULT_FORBIDDEN_TOKENS: [&str; 6] = ["insert", "update", "delete", "drop", "create", "alter"];

/// Built-in supply-chain schema, used unless `NLQ_SCHEMA_PATH` points elsewhere.
pub const DEFAULT_SCHEMA: &str = include_str!("../schema/supply_chain.txt");

/// Value that must never show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Static description of tables, columns and foreign keys handed to the model.
/// Loaded once and shared read-only between runs.
#[derive(Debug, Clone)]
pub struct SchemaDescription(Arc<str>);

impl SchemaDescription {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(Arc::from(text.as_ref()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Err(NlqError::Config(format!(
                "schema description at {} is empty",
                path.display()
            )));
        }
        Ok(Self::new(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SchemaDescription {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Secret,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub database: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub forbidden_tokens: Vec<String>,
    pub schema: SchemaDescription,
    /// Also block non-query statements deterministically, not only through the model gate.
    pub strict_read_only: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` is this with
    /// `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| NlqError::Config(format!("{} is not set", key)))
        };

        let llm = LlmConfig {
            endpoint: get("NLQ_LLM_ENDPOINT").unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            model: get("NLQ_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            api_key: Secret::new(required("OPENROUTER_API_KEY")?),
            timeout: Duration::from_secs(parse_or(get("NLQ_LLM_TIMEOUT_SECS"), "NLQ_LLM_TIMEOUT_SECS", 30)?),
        };

        let port_raw = required("MYSQL_PORT")?;
        let port = port_raw
            .parse::<u16>()
            .map_err(|_| NlqError::Config(format!("MYSQL_PORT must be a port number, got '{}'", port_raw)))?;

        let database = DatabaseConfig {
            host: required("MYSQL_HOST")?,
            port,
            user: required("MYSQL_USER")?,
            password: Secret::new(required("MYSQL_PASSWORD")?),
            database: required("MYSQL_DATABASE")?,
            max_connections: parse_or(get("NLQ_DB_MAX_CONNECTIONS"), "NLQ_DB_MAX_CONNECTIONS", 5)?,
            acquire_timeout: Duration::from_secs(parse_or(
                get("NLQ_DB_ACQUIRE_TIMEOUT_SECS"),
                "NLQ_DB_ACQUIRE_TIMEOUT_SECS",
                10,
            )?),
        };

        let forbidden_tokens = match get("NLQ_FORBIDDEN_TOKENS") {
            Some(list) => parse_token_list(&list)?,
            None => DEFAULT_FORBIDDEN_TOKENS.iter().map(|t| t.to_string()).collect(),
        };

        let schema = match get("NLQ_SCHEMA_PATH") {
            Some(path) => SchemaDescription::load(Path::new(&path))
                .map_err(|e| NlqError::Config(format!("NLQ_SCHEMA_PATH: {}", e)))?,
            None => SchemaDescription::default(),
        };

        let strict_read_only = match get("NLQ_STRICT_READ_ONLY") {
            Some(v) => parse_bool(&v)
                .ok_or_else(|| NlqError::Config(format!("NLQ_STRICT_READ_ONLY must be true or false, got '{}'", v)))?,
            None => true,
        };

        Ok(Self {
            llm,
            database,
            forbidden_tokens,
            schema,
            strict_read_only,
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| NlqError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated, case-insensitive word list. Empty lists and non-word
/// tokens are rejected.
pub fn parse_token_list(list: &str) -> Result<Vec<String>> {
    let tokens: Vec<String> = list
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(NlqError::Config("forbidden token list is empty".to_string()));
    }
    if let Some(bad) = tokens.iter().find(|t| !t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')) {
        return Err(NlqError::Config(format!("forbidden token list contains a non-word token '{}'", bad)));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("OPENROUTER_API_KEY", "sk-test"),
            ("MYSQL_HOST", "localhost"),
            ("MYSQL_PORT", "3306"),
            ("MYSQL_USER", "reader"),
            ("MYSQL_PASSWORD", "hunter2"),
            ("MYSQL_DATABASE", "supply_chain_management"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults_applied() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.llm.endpoint, DEFAULT_LLM_ENDPOINT);
        assert_eq!(config.llm.model, DEFAULT_LLM_MODEL);
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.forbidden_tokens.len(), 6);
        assert!(config.strict_read_only);
        assert!(config.schema.as_str().contains("supply_chain_management.suppliers"));
    }

    #[test]
    fn test_missing_required_value_names_variable() {
        let mut env = base_env();
        env.remove("MYSQL_PASSWORD");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, NlqError::Config(ref msg) if msg.contains("MYSQL_PASSWORD")));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("OPENROUTER_API_KEY", "   ");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut env = base_env();
        env.insert("MYSQL_PORT", "mysql");
        assert!(matches!(load(&env), Err(NlqError::Config(_))));
    }

    #[test]
    fn test_forbidden_token_override() {
        let mut env = base_env();
        env.insert("NLQ_FORBIDDEN_TOKENS", "Insert, TRUNCATE ,,grant");
        let config = load(&env).unwrap();
        assert_eq!(config.forbidden_tokens, vec!["insert", "truncate", "grant"]);

        env.insert("NLQ_FORBIDDEN_TOKENS", "drop table");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_token_list_rejects_non_words() {
        assert_eq!(parse_token_list("Drop, rename").unwrap(), vec!["drop", "rename"]);
        assert!(parse_token_list(" , ,").is_err());
        assert!(parse_token_list("drop;--").is_err());
        assert!(parse_token_list("a|b").is_err());
    }

    #[test]
    fn test_strict_flag_parsing() {
        let mut env = base_env();
        env.insert("NLQ_STRICT_READ_ONLY", "false");
        assert!(!load(&env).unwrap().strict_read_only);
        env.insert("NLQ_STRICT_READ_ONLY", "maybe");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = load(&base_env()).unwrap();
        let rendered = format!("{:?}", config.database);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(config.database.password.expose(), "hunter2");
    }
}
