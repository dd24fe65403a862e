//! Query Result - materialized rows returned by an executor

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Rows of a result set, every value rendered as text. `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Plain-text table of the first `limit` rows, columns padded to equal width.
    pub fn render(&self, limit: usize) -> String {
        if self.columns.is_empty() {
            return "(empty result set)".to_string();
        }

        let shown: Vec<Vec<&str>> = self
            .rows
            .iter()
            .take(limit)
            .map(|row| row.iter().map(|v| v.as_deref().unwrap_or("NULL")).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                shown
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|v| v.chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let pad_line = |cells: Vec<&str>| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut lines = vec![pad_line(self.columns.iter().map(String::as_str).collect())];
        if shown.is_empty() {
            lines.push("(no rows)".to_string());
        }
        lines.extend(shown.into_iter().map(pad_line));

        if self.rows.len() > limit {
            lines.push(format!("... ({} more rows)", self.rows.len() - limit));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suppliers() -> RowSet {
        RowSet::new(
            vec!["supplier_name".to_string(), "city".to_string()],
            vec![
                vec![Some("Bosch".to_string()), Some("Stuttgart".to_string())],
                vec![Some("Siemens".to_string()), None],
                vec![Some("BASF".to_string()), Some("Ludwigshafen".to_string())],
            ],
        )
    }

    #[test]
    fn test_counts() {
        let rs = suppliers();
        assert_eq!(rs.row_count(), 3);
        assert_eq!(rs.column_count(), 2);
        assert!(!rs.is_empty());
        assert!(RowSet::empty().is_empty());
    }

    #[test]
    fn test_render_aligns_columns_and_shows_null() {
        let text = suppliers().render(5);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "supplier_name  city");
        assert_eq!(lines[1], "Bosch          Stuttgart");
        assert_eq!(lines[2], "Siemens        NULL");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_render_truncates() {
        let text = suppliers().render(1);
        assert!(text.contains("Bosch"));
        assert!(!text.contains("Siemens"));
        assert!(text.ends_with("... (2 more rows)"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(RowSet::empty().render(5), "(empty result set)");
        let headers_only = RowSet::new(vec!["order_id".to_string()], vec![]);
        assert_eq!(headers_only.render(5), "order_id\n(no rows)");
    }
}
