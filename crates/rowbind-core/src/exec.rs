//! Prepare-run-release helpers over any [`Executor`].
//!
//! Each helper prepares the statement, runs it, and always hands the
//! statement back to the driver afterwards. A failed release is logged
//! and never replaces the operation's own outcome.

use crate::connection::{ExecResult, Executor, PreparedStatement};
use crate::error::Error;
use crate::mapper::SchemaMapper;
use crate::record::Record;
use crate::row::Rows;
use crate::scan::{Destination, scan};
use crate::value::Value;
use asupersync::{Cx, Outcome};

async fn release<E: Executor>(cx: &Cx, executor: &E, stmt: PreparedStatement) {
    let sql = stmt.sql().to_string();
    if let Err(err) = executor.close_prepared(cx, stmt).await {
        tracing::error!(sql = %sql, error = %err, "failed to close prepared statement");
    }
}

/// Run an already prepared statement for rows.
pub async fn fetch_prepared<E: Executor>(
    cx: &Cx,
    executor: &E,
    stmt: &PreparedStatement,
    params: &[Value],
) -> Outcome<Rows, Error> {
    let columns = stmt.columns().map(<[String]>::to_vec).unwrap_or_default();
    match executor.query_prepared(cx, stmt, params).await {
        Outcome::Ok(rows) => Outcome::Ok(Rows::new(columns, rows)),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Prepare and run a query, returning a buffered cursor.
pub async fn fetch<E: Executor>(
    cx: &Cx,
    executor: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<Rows, Error> {
    let stmt = match executor.prepare(cx, sql).await {
        Outcome::Ok(stmt) => stmt,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    let outcome = fetch_prepared(cx, executor, &stmt, params).await;
    release(cx, executor, stmt).await;
    outcome
}

/// Prepare and run a mutating statement.
pub async fn execute<E: Executor>(
    cx: &Cx,
    executor: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<ExecResult, Error> {
    let stmt = match executor.prepare(cx, sql).await {
        Outcome::Ok(stmt) => stmt,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    let outcome = executor.execute_prepared(cx, &stmt, params).await;
    release(cx, executor, stmt).await;
    outcome
}

/// Run a prepared statement and scan its rows into `dest`.
pub async fn statement_query_scan<R: Record, E: Executor>(
    cx: &Cx,
    executor: &E,
    stmt: &PreparedStatement,
    mapper: &SchemaMapper,
    dest: Destination<'_, R>,
    params: &[Value],
) -> Outcome<(), Error> {
    match fetch_prepared(cx, executor, stmt, params).await {
        Outcome::Ok(mut rows) => match scan(mapper, dest, &mut rows) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Prepare and run a query, scanning its rows into `dest`.
pub async fn query_scan<R: Record, E: Executor>(
    cx: &Cx,
    executor: &E,
    mapper: &SchemaMapper,
    dest: Destination<'_, R>,
    sql: &str,
    params: &[Value],
) -> Outcome<(), Error> {
    match fetch(cx, executor, sql, params).await {
        Outcome::Ok(mut rows) => match scan(mapper, dest, &mut rows) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}
