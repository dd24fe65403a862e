//! Query execution against the supply-chain database.

pub mod engine;
pub mod mysql_engine;
pub mod result;

pub use engine::QueryExecutor;
pub use mysql_engine::MySqlExecutor;
pub use result::RowSet;
