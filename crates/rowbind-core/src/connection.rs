//! Driver-layer traits.
//!
//! This module defines what rowbind needs from a database driver:
//!
//! - [`Executor`] - prepare a statement and run it for rows or a mutation result
//! - [`Connection`] - an [`Executor`] that can open transactions
//! - [`TransactionOps`] - an [`Executor`] bound to one live transaction
//! - [`Connect`] - open a [`Connection`] from a [`ConnectionConfig`]
//!
//! All operations take a `Cx` context for cancellation and return an
//! asupersync `Outcome`.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Read uncommitted: dirty reads are possible.
    ReadUncommitted,
    /// Read committed: only committed changes from others are visible.
    #[default]
    ReadCommitted,
    /// Repeatable read: a consistent snapshot for the whole transaction.
    RepeatableRead,
    /// Serializable: transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A statement prepared by the driver.
///
/// The handle must be handed back through [`Executor::close_prepared`]
/// once the caller is done with it.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Driver-specific identifier
    id: u64,
    /// The original SQL text
    sql: String,
    /// Number of expected parameters
    param_count: usize,
    /// Column information for result rows (if available)
    columns: Option<Vec<String>>,
}

impl PreparedStatement {
    /// Create a new prepared statement.
    ///
    /// This is typically called by the driver, not by users directly.
    #[must_use]
    pub fn new(id: u64, sql: String, param_count: usize) -> Self {
        Self {
            id,
            sql,
            param_count,
            columns: None,
        }
    }

    /// Create a prepared statement with column information.
    #[must_use]
    pub fn with_columns(id: u64, sql: String, param_count: usize, columns: Vec<String>) -> Self {
        Self {
            id,
            sql,
            param_count,
            columns: Some(columns),
        }
    }

    /// Get the statement ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Get the original SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the expected number of parameters.
    #[must_use]
    pub const fn param_count(&self) -> usize {
        self.param_count
    }

    /// Get the column information, if available.
    #[must_use]
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Check if the provided parameters match the expected count.
    #[must_use]
    pub fn validate_params(&self, params: &[Value]) -> bool {
        params.len() == self.param_count
    }
}

/// Result of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Number of rows the statement changed
    pub rows_affected: u64,
    /// Generated key of the last inserted row, when the driver reports one
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    /// Result reporting only an affected row count.
    pub const fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }
}

/// Something statements can be prepared and executed against.
///
/// Both plain connections and live transactions are executors, so callers
/// can run the same code against either.
pub trait Executor: Send + Sync {
    /// Prepare a statement.
    fn prepare(
        &self,
        cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send;

    /// Run a prepared statement and fetch its rows.
    fn query_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a prepared statement for its side effects.
    fn execute_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send;

    /// Release a prepared statement.
    ///
    /// Failures are reported but callers treat them as non-fatal.
    fn close_prepared(
        &self,
        _cx: &Cx,
        _stmt: PreparedStatement,
    ) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// A live transaction.
///
/// `commit` and `rollback` take `&self` because the handle is shared by
/// every session that joined it; drivers guard their own state.
pub trait TransactionOps: Executor + 'static {
    /// Commit the transaction.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the transaction.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// A database connection source capable of opening transactions.
///
/// Implementations must be `Send + Sync`; a storage shares one source
/// between every session routed to it.
pub trait Connection: Executor + 'static {
    /// Transaction handle type.
    type Tx: TransactionOps;

    /// Begin a transaction with the given isolation level.
    fn begin_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx, Error>> + Send;

    /// Begin a transaction with the default isolation level.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx, Error>> + Send {
        self.begin_with(cx, IsolationLevel::default())
    }

    /// Check that the connection is alive.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// A connection that can be opened from configuration.
pub trait Connect: Connection + Sized {
    /// Open a connection.
    fn connect(
        cx: &Cx,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Outcome<Self, Error>> + Send;
}

/// Configuration for database connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connection string or URL
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application name for connection identification
    pub application_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 30_000,
            application_name: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}
