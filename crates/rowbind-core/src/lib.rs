//! Core types and traits for rowbind.
//!
//! This crate provides the foundations the session layer builds on:
//!
//! - `Record` and `Model` descriptors for struct mapping
//! - `TagDirective` parsing and naming transforms
//! - `SchemaMapper` for cached, per-storage column metadata
//! - `scan` for filling records from result cursors
//! - `Executor`, `Connection` and `TransactionOps` for the driver layer
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod exec;
pub mod mapper;
pub mod naming;
pub mod record;
pub mod row;
pub mod scan;
pub mod tag;
pub mod value;

pub use connection::{
    Connect, Connection, ConnectionConfig, ExecResult, Executor, IsolationLevel,
    PreparedStatement, TransactionOps,
};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, MappingError, MappingErrorKind,
    QueryError, QueryErrorKind, Result, ShapeError, TransactionError, TransactionErrorKind,
    TypeError,
};
pub use exec::{execute, fetch, fetch_prepared, query_scan, statement_query_scan};
pub use mapper::{FieldInfo, SchemaMapper, StructMapper};
pub use naming::{NamingFn, NamingStrategy, hump_to_underscore, verbatim};
pub use record::{FieldShape, Model, Record, RecordShape, invalid_path};
pub use row::{ColumnInfo, FromValue, Row, RowCursor, Rows};
pub use scan::{Destination, scan};
pub use tag::{TagDirective, TagKey};
pub use value::Value;
