use crate::sql_validator::ValidationReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Diagnostics of a successful run. Built once, after execution succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub generation_time: Duration,
    pub execution_time: Duration,
    pub rows_returned: usize,
    pub columns: usize,
    pub validation: ValidationReport,
    /// Similarity between the first and the regenerated SQL, if regeneration ran.
    pub regeneration_similarity: Option<f64>,
}

impl RunMetrics {
    pub fn regenerated(&self) -> bool {
        self.regeneration_similarity.is_some()
    }
}

fn title_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Generation Time: {:.3}s", self.generation_time.as_secs_f64())?;
        writeln!(f, "Execution Time: {:.3}s", self.execution_time.as_secs_f64())?;
        writeln!(f, "Rows Returned: {}", self.rows_returned)?;
        writeln!(f, "Columns: {}", self.columns)?;
        writeln!(f, "Syntax Valid: {}", title_bool(self.validation.syntax_valid))?;
        writeln!(f, "Forbidden Tokens: {}", self.validation.forbidden_token_count)?;
        write!(f, "Query Complexity: {}", self.validation.complexity_score)?;
        if let Some(similarity) = self.regeneration_similarity {
            write!(f, "\nRegenerated: True\nRegeneration Similarity: {:.3}", similarity)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> RunMetrics {
        RunMetrics {
            generation_time: Duration::from_millis(812),
            execution_time: Duration::from_micros(4_200),
            rows_returned: 3,
            columns: 2,
            validation: ValidationReport {
                syntax_valid: true,
                forbidden_token_count: 0,
                complexity_score: 1,
            },
            regeneration_similarity: None,
        }
    }

    #[test]
    fn test_metrics_block_format() {
        let text = metrics().to_string();
        assert_eq!(
            text,
            "Generation Time: 0.812s\n\
             Execution Time: 0.004s\n\
             Rows Returned: 3\n\
             Columns: 2\n\
             Syntax Valid: True\n\
             Forbidden Tokens: 0\n\
             Query Complexity: 1"
        );
    }

    #[test]
    fn test_regeneration_lines() {
        let mut m = metrics();
        m.validation.syntax_valid = false;
        m.regeneration_similarity = Some(0.7342);
        let text = m.to_string();
        assert!(m.regenerated());
        assert!(text.contains("Syntax Valid: False"));
        assert!(text.ends_with("Regenerated: True\nRegeneration Similarity: 0.734"));
    }
}
