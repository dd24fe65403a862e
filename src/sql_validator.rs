//! Static SQL checks
//!
//! Pure text checks run on every generated statement. Apart from
//! `is_read_only` (used by the strict guard) none of them block execution;
//! they feed the run metrics.

use crate::error::{NlqError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

lazy_static! {
    static ref JOIN_WORD: Regex = Regex::new(r"(?i)\bjoin\b").unwrap();
    static ref SUBQUERY_OPEN: Regex = Regex::new(r"(?i)\(\s*select\b").unwrap();
    // "sql" may share a line with the statement; any other tag must end its line.
    static ref OPENING_FENCE: Regex =
        Regex::new(r"^```(?:(?i:sql)\b|[A-Za-z0-9_+\-]+[ \t]*\r?\n)?\s*").unwrap();
    static ref CLOSING_FENCE: Regex = Regex::new(r"\s*```$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub syntax_valid: bool,
    pub forbidden_token_count: usize,
    pub complexity_score: usize,
}

pub struct SqlValidator {
    forbidden: Option<Regex>,
}

impl SqlValidator {
    pub fn new(forbidden_tokens: &[String]) -> Result<Self> {
        let words: Vec<String> = forbidden_tokens
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();

        let forbidden = if words.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
            Some(Regex::new(&pattern).map_err(|e| NlqError::Config(format!("invalid forbidden token list: {}", e)))?)
        };

        Ok(Self { forbidden })
    }

    /// True when the text parses into at least one statement.
    pub fn validate_syntax(&self, sql: &str) -> bool {
        matches!(Parser::parse_sql(&MySqlDialect {}, sql), Ok(statements) if !statements.is_empty())
    }

    pub fn count_forbidden_tokens(&self, sql: &str) -> usize {
        self.forbidden
            .as_ref()
            .map(|re| re.find_iter(sql).count())
            .unwrap_or(0)
    }

    /// `join` keywords plus subquery openings.
    pub fn compute_complexity(&self, sql: &str) -> usize {
        JOIN_WORD.find_iter(sql).count() + SUBQUERY_OPEN.find_iter(sql).count()
    }

    /// Normalized edit similarity in [0, 1].
    pub fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }

    pub fn report(&self, sql: &str) -> ValidationReport {
        ValidationReport {
            syntax_valid: self.validate_syntax(sql),
            forbidden_token_count: self.count_forbidden_tokens(sql),
            complexity_score: self.compute_complexity(sql),
        }
    }

    /// Exactly one statement, and it is a query. Unparsable text is never
    /// read-only, and neither is a batch: the executor runs every statement
    /// of a multi-statement string.
    pub fn is_read_only(&self, sql: &str) -> bool {
        match Parser::parse_sql(&MySqlDialect {}, sql) {
            Ok(statements) => matches!(statements.as_slice(), [Statement::Query(_)]),
            Err(_) => false,
        }
    }
}

/// Remove the markdown fences a model tends to wrap SQL in, nested ones
/// included.
pub fn strip_code_fences(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let without_open = OPENING_FENCE.replace(&current, "");
        let stripped = CLOSING_FENCE.replace(&without_open, "").trim().to_string();
        if stripped == current {
            return stripped;
        }
        current = stripped;
    }
}
