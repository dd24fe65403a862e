//! Execution trait shared by the MySQL executor and test doubles.

use crate::error::Result;
use crate::execution::result::RowSet;
use async_trait::async_trait;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Engine name for logs (e.g. "mysql").
    fn name(&self) -> &'static str;

    /// Run one statement and materialize every row.
    ///
    /// A statement the database rejects is `NlqError::Execution`. An executor
    /// without a connection returns an empty `RowSet` instead, so callers that
    /// must tell the two apart check `is_degraded` as well.
    async fn execute(&self, sql: &str) -> Result<RowSet>;

    /// True when the startup connection failed and results are always empty.
    fn is_degraded(&self) -> bool;
}
