//! Statement builders for rowbind.
//!
//! The session layer seeds these builders with table and column metadata
//! and turns them into `(sql, params)` pairs:
//!
//! - [`SelectStatement`], [`InsertStatement`], [`UpdateStatement`],
//!   [`DeleteStatement`] and the [`Statement`] wrapper
//! - [`Predicate`] for WHERE clauses
//! - [`PlaceholderStyle`] for the driver's parameter syntax

pub mod placeholder;
pub mod predicate;
pub mod statement;

pub use placeholder::PlaceholderStyle;
pub use predicate::{Order, Predicate};
pub use statement::{
    DeleteStatement, InsertStatement, SelectStatement, Statement, StatementBuilder, StatementKind,
    UpdateStatement, delete, insert, select, update,
};
