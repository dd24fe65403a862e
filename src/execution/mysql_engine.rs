//! MySQL Execution Engine
//!
//! Owns a sqlx connection pool, so concurrent runs never share a connection
//! mid-statement. If the pool cannot be opened at startup the executor stays
//! usable in degraded mode: every statement returns an empty result set.

use crate::config::DatabaseConfig;
use crate::error::{NlqError, Result};
use crate::execution::engine::QueryExecutor;
use crate::execution::result::RowSet;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use tracing::{debug, info, warn};

pub struct MySqlExecutor {
    pool: Option<MySqlPool>,
    degraded_reason: Option<String>,
}

impl MySqlExecutor {
    /// Connect to the configured database. Never fails: a connection error is
    /// logged and leaves the executor degraded.
    pub async fn connect(config: &DatabaseConfig) -> Self {
        match Self::open_pool(config).await {
            Ok(pool) => {
                info!("Connected to MySQL {}:{}/{}", config.host, config.port, config.database);
                Self::from_pool(pool)
            }
            Err(e) => {
                let err = NlqError::ConnectionDegraded(e.to_string());
                warn!(
                    "MySQL connection to {}:{}/{} failed, queries will return empty results: {}",
                    config.host, config.port, config.database, err
                );
                Self {
                    pool: None,
                    degraded_reason: Some(err.to_string()),
                }
            }
        }
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool: Some(pool),
            degraded_reason: None,
        }
    }

    async fn open_pool(config: &DatabaseConfig) -> std::result::Result<MySqlPool, sqlx::Error> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose())
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(pool)
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded_reason.as_deref()
    }
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn execute(&self, sql: &str) -> Result<RowSet> {
        let Some(pool) = &self.pool else {
            debug!("No database connection, returning empty result");
            return Ok(RowSet::empty());
        };

        // raw_sql goes over the text protocol, so every value arrives as text.
        let rows = sqlx::raw_sql(sql).fetch_all(pool).await.map_err(classify_error)?;

        Ok(materialize(&rows))
    }

    fn is_degraded(&self) -> bool {
        self.pool.is_none()
    }
}

/// Only a server-side rejection is the statement's fault; everything else is
/// about the connection and must not trigger a rewrite of the SQL.
fn classify_error(err: sqlx::Error) -> NlqError {
    match err {
        sqlx::Error::Database(db) => NlqError::Execution(db.to_string()),
        other => NlqError::Database(other.to_string()),
    }
}

fn materialize(rows: &[MySqlRow]) -> RowSet {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let values = rows
        .iter()
        .map(|row| (0..row.columns().len()).map(|idx| cell_text(row, idx)).collect())
        .collect();

    RowSet::new(columns, values)
}

fn cell_text(row: &MySqlRow, idx: usize) -> Option<String> {
    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(value) => value,
        Err(_) => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| format!("<{} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use std::time::Duration;

    fn unreachable_config() -> DatabaseConfig {
        // Bind then drop a listener to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port,
            user: "reader".to_string(),
            password: Secret::new("secret"),
            database: "supply_chain_management".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_failed_connection_degrades_instead_of_erroring() {
        let executor = MySqlExecutor::connect(&unreachable_config()).await;
        assert!(executor.is_degraded());
        assert!(executor.degraded_reason().unwrap().contains("Database unavailable"));

        let rows = executor.execute("SELECT * FROM suppliers").await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(rows.column_count(), 0);
    }

    #[derive(Debug)]
    struct UnknownColumn;

    impl std::fmt::Display for UnknownColumn {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "1054 (42S22): Unknown column 'supplier' in 'field list'")
        }
    }

    impl std::error::Error for UnknownColumn {}

    impl sqlx::error::DatabaseError for UnknownColumn {
        fn message(&self) -> &str {
            "Unknown column 'supplier' in 'field list'"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    #[test]
    fn test_server_rejection_is_execution_error() {
        match classify_error(sqlx::Error::Database(Box::new(UnknownColumn))) {
            NlqError::Execution(msg) => assert!(msg.contains("Unknown column 'supplier'")),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_connection_failures_are_not_execution_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer");
        for err in [sqlx::Error::PoolTimedOut, sqlx::Error::PoolClosed, sqlx::Error::Io(io)] {
            match classify_error(err) {
                NlqError::Database(_) => {}
                other => panic!("unexpected mapping: {:?}", other),
            }
        }
    }

    #[test]
    fn test_materialize_no_rows() {
        let rs = materialize(&[]);
        assert_eq!(rs, RowSet::empty());
    }
}
