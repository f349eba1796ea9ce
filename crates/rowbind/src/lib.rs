//! rowbind - struct-to-row mapping with hooks and nested transactions.
//!
//! rowbind maps plain Rust structs onto SQL rows and runs CRUD operations
//! through a [`Session`] that:
//!
//! - derives column metadata from `#[derive(Record)]` descriptors, cached per
//!   storage and record type
//! - fills statements from that metadata and scans result rows back into records
//! - runs before/after hooks around every operation
//! - gives writes a transaction through the built-in hooks, joining an
//!   enclosing one when there is one so only the outermost scope commits
//! - routes reads to replicas round-robin and writes to the primary
//!
//! # Quick Start
//!
//! ```ignore
//! use rowbind::prelude::*;
//!
//! #[derive(Record, Debug, Default)]
//! #[orm(table = "users")]
//! pub struct User {
//!     #[orm("pk")]
//!     pub id: i64,
//!     pub display_name: String,
//!     #[orm("readonly")]
//!     pub created_at: Option<i64>,
//! }
//!
//! async fn example(cx: &Cx, orm: &Orm<impl Connection>) -> Outcome<(), Error> {
//!     let ctx = OrmContext::new(cx);
//!     let mut session = match orm.session() {
//!         Ok(s) => s,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!
//!     let user = User { display_name: "ada".into(), ..User::default() };
//!     if let Outcome::Err(e) = session.insert(&ctx, &user).await {
//!         return Outcome::Err(e);
//!     }
//!
//!     session.with_statement(select(["*"]).order_by(Order::desc("id")).limit(10));
//!     let mut recent = Vec::new();
//!     session.select::<User>(&ctx, Destination::Many(&mut recent)).await
//! }
//! ```

pub use asupersync::{Cx, Outcome};
pub use futures::future::BoxFuture;

pub use rowbind_core::{
    Connect, Connection, ConnectionConfig, Destination, Error, ExecResult, Executor, FieldInfo,
    FieldShape, FromValue, IsolationLevel, MappingErrorKind, Model, NamingFn, NamingStrategy,
    PreparedStatement, Record, RecordShape, Result, Row, RowCursor, Rows, SchemaMapper,
    StructMapper, TagDirective, TransactionErrorKind, TransactionOps, Value, hump_to_underscore,
    query_scan, scan, statement_query_scan, verbatim,
};
pub use rowbind_macros::Record;
pub use rowbind_pool::{
    ReplicaSet, ReplicaStrategy, ReplicatedStorageConfig, Route, RouteHint, SimpleStorageConfig,
    SqlAction, Storage, StorageConfig,
};
pub use rowbind_query::{
    DeleteStatement, InsertStatement, Order, PlaceholderStyle, Predicate, SelectStatement,
    Statement, StatementBuilder, StatementKind, UpdateStatement, delete, insert, select, update,
};
pub use rowbind_session::{
    BeginTxHook, EndTxHook, Hook, HookEvent, HookFuture, HookRegistry, Orm, OrmContext,
    SelectJoinHook, Session, TxScope,
};

#[cfg(feature = "testing")]
pub use rowbind_session::testing;

/// The commonly used types, traits and builders.
pub mod prelude {
    pub use crate::{
        BoxFuture, Connection, Cx, Destination, Error, ExecResult, HookEvent, HookRegistry, Model,
        Order, Orm, OrmContext, Outcome, Predicate, Record, Session, StorageConfig, Value, delete,
        insert, select, update,
    };
}
