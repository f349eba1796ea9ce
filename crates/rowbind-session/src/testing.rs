//! Recording driver for tests.
//!
//! [`MemoryDatabase`] does not interpret SQL. Every statement and
//! transaction step is recorded as an [`Event`], row queries answer with
//! rows registered through [`MemoryDatabase::respond`], and writes answer
//! with results registered through [`MemoryDatabase::respond_exec`]. Tests
//! assert on the recorded SQL, on routing between connection labels and on
//! transaction boundaries.
//!
//! Connections handed out by one database share its recording, so a
//! "replica" and the primary land in the same event log. Failures can be
//! injected with [`MemoryDatabase::fail_on`],
//! [`MemoryDatabase::fail_next_commit`] and
//! [`MemoryDatabase::fail_next_rollback`].
//!
//! Enabled for this crate's own tests and behind the `testing` feature.

use asupersync::{Cx, Outcome};
use rowbind_core::error::{ConnectionError, QueryError};
use rowbind_core::{
    Connect, Connection, ConnectionConfig, ConnectionErrorKind, Error, ExecResult, Executor,
    IsolationLevel, PreparedStatement, QueryErrorKind, Result, Row, TransactionErrorKind,
    TransactionOps, Value,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// What a recorded [`Event`] was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Begin,
    Commit,
    Rollback,
    Prepare,
    /// A prepared statement handed back
    Close,
    /// A statement run for rows
    Query,
    /// A statement run for its side effects
    Execute,
}

/// One interaction with the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Label of the connection that issued it
    pub label: String,
    pub kind: EventKind,
    /// Transaction the event belongs to, `None` outside one
    pub transaction: Option<u64>,
    /// SQL text for statement events
    pub sql: Option<String>,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
struct Canned {
    pattern: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    responses: Vec<Canned>,
    exec_responses: Vec<(String, ExecResult)>,
    fail_on: Vec<String>,
    fail_next_commit: bool,
    fail_next_rollback: bool,
    next_tx: u64,
    committed: HashSet<u64>,
}

/// The longest registered pattern contained in `sql`.
fn best_match<'a, T>(entries: &'a [T], sql: &str, pattern: impl Fn(&T) -> &str) -> Option<&'a T> {
    entries
        .iter()
        .filter(|entry| sql.contains(pattern(entry)))
        .max_by_key(|entry| pattern(entry).len())
}

impl State {
    fn record(
        &mut self,
        label: &str,
        kind: EventKind,
        transaction: Option<u64>,
        sql: Option<&str>,
        params: &[Value],
    ) {
        self.events.push(Event {
            label: label.to_string(),
            kind,
            transaction,
            sql: sql.map(str::to_string),
            params: params.to_vec(),
        });
    }

    fn injected_failure(&self, sql: &str) -> Option<Error> {
        self.fail_on
            .iter()
            .find(|pattern| sql.contains(pattern.as_str()))
            .map(|pattern| {
                Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(sql.to_string()),
                    message: format!("injected failure for `{pattern}`"),
                    source: None,
                })
            })
    }

    fn rows_for(&self, sql: &str) -> Vec<Row> {
        best_match(&self.responses, sql, |c| c.pattern.as_str()).map_or_else(Vec::new, |canned| {
            canned
                .rows
                .iter()
                .map(|values| Row::new(canned.columns.clone(), values.clone()))
                .collect()
        })
    }

    fn result_for(&self, sql: &str) -> ExecResult {
        best_match(&self.exec_responses, sql, |(pattern, _)| pattern.as_str())
            .map_or(ExecResult::affected(1), |(_, result)| *result)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn registry() -> &'static Mutex<HashMap<String, MemoryDatabase>> {
    static DATABASES: OnceLock<Mutex<HashMap<String, MemoryDatabase>>> = OnceLock::new();
    DATABASES.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_STATEMENT: AtomicU64 = AtomicU64::new(1);

/// A shared recording database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    /// A fresh, unnamed database.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide database called `name`, created on first use.
    ///
    /// [`MemoryConnection::connect`] resolves `mem://<name>/<label>` URLs
    /// through this registry.
    pub fn named(name: &str) -> Self {
        lock(registry())
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// A connection labelled `label` for event bookkeeping.
    pub fn connection(&self, label: impl Into<String>) -> MemoryConnection {
        MemoryConnection {
            db: self.clone(),
            label: label.into(),
        }
    }

    /// Answer row queries whose SQL contains `pattern` with `rows`.
    ///
    /// The longest matching pattern wins; a query nothing matches gets no
    /// rows.
    pub fn respond<C, R>(&self, pattern: impl Into<String>, columns: C, rows: R)
    where
        C: IntoIterator,
        C::Item: Into<String>,
        R: IntoIterator<Item = Vec<Value>>,
    {
        let pattern = pattern.into();
        let mut state = lock(&self.state);
        state.responses.retain(|c| c.pattern != pattern);
        state.responses.push(Canned {
            pattern,
            columns: columns.into_iter().map(Into::into).collect(),
            rows: rows.into_iter().collect(),
        });
    }

    /// Answer writes whose SQL contains `pattern` with `result`.
    ///
    /// Unmatched writes report one affected row.
    pub fn respond_exec(&self, pattern: impl Into<String>, result: ExecResult) {
        let pattern = pattern.into();
        let mut state = lock(&self.state);
        state.exec_responses.retain(|(p, _)| *p != pattern);
        state.exec_responses.push((pattern, result));
    }

    /// Forget every canned answer.
    pub fn clear_responses(&self) {
        let mut state = lock(&self.state);
        state.responses.clear();
        state.exec_responses.clear();
    }

    /// Fail every statement whose SQL contains `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        lock(&self.state).fail_on.push(pattern.into());
    }

    /// Make the next commit fail.
    pub fn fail_next_commit(&self) {
        lock(&self.state).fail_next_commit = true;
    }

    /// Make the next rollback fail.
    pub fn fail_next_rollback(&self) {
        lock(&self.state).fail_next_rollback = true;
    }

    /// Drop all injected failures.
    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.fail_on.clear();
        state.fail_next_commit = false;
        state.fail_next_rollback = false;
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.state).events.clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// SQL of every query and execute, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Query | EventKind::Execute))
            .filter_map(|e| e.sql.clone())
            .collect()
    }

    /// SQL of every write that took effect: run outside a transaction, or
    /// inside one that committed.
    pub fn committed_sql(&self) -> Vec<String> {
        let state = lock(&self.state);
        state
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Execute)
            .filter(|e| e.transaction.is_none_or(|tx| state.committed.contains(&tx)))
            .filter_map(|e| e.sql.clone())
            .collect()
    }

    /// Number of row queries issued through connections labelled `label`.
    pub fn queries_on(&self, label: &str) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Query && e.label == label)
            .count()
    }
}

/// A connection to a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    label: String,
}

impl MemoryConnection {
    /// Label events from this connection are recorded under.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}

fn prepare_statement(
    cx: &Cx,
    state: &Arc<Mutex<State>>,
    label: &str,
    transaction: Option<u64>,
    sql: &str,
) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send {
    let cancelled = cx.cancel_reason();
    let state = Arc::clone(state);
    let label = label.to_string();
    let sql = sql.to_string();
    async move {
        if let Some(reason) = cancelled {
            return Outcome::Cancelled(reason);
        }
        lock(&state).record(&label, EventKind::Prepare, transaction, Some(&sql), &[]);
        let param_count = sql.chars().filter(|c| matches!(c, '?' | '$')).count();
        Outcome::Ok(PreparedStatement::new(
            NEXT_STATEMENT.fetch_add(1, Ordering::Relaxed),
            sql,
            param_count,
        ))
    }
}

fn close_statement(
    state: &Arc<Mutex<State>>,
    label: &str,
    transaction: Option<u64>,
    stmt: &PreparedStatement,
) -> impl Future<Output = Result<()>> + Send + use<> {
    let state = Arc::clone(state);
    let label = label.to_string();
    let sql = stmt.sql().to_string();
    async move {
        lock(&state).record(&label, EventKind::Close, transaction, Some(&sql), &[]);
        Ok(())
    }
}

/// Record a statement and fail it when an injected pattern matches.
fn run_recorded(
    state: &mut State,
    label: &str,
    kind: EventKind,
    transaction: Option<u64>,
    stmt: &PreparedStatement,
    params: &[Value],
) -> Result<()> {
    state.record(label, kind, transaction, Some(stmt.sql()), params);
    match state.injected_failure(stmt.sql()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn query_recorded(
    cx: &Cx,
    state: &Arc<Mutex<State>>,
    label: &str,
    transaction: Option<u64>,
    stmt: &PreparedStatement,
    params: &[Value],
) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
    let cancelled = cx.cancel_reason();
    let state = Arc::clone(state);
    let label = label.to_string();
    let stmt = stmt.clone();
    let params = params.to_vec();
    async move {
        if let Some(reason) = cancelled {
            return Outcome::Cancelled(reason);
        }
        let mut guard = lock(&state);
        match run_recorded(&mut guard, &label, EventKind::Query, transaction, &stmt, &params) {
            Ok(()) => Outcome::Ok(guard.rows_for(stmt.sql())),
            Err(e) => Outcome::Err(e),
        }
    }
}

fn execute_recorded(
    cx: &Cx,
    state: &Arc<Mutex<State>>,
    label: &str,
    transaction: Option<u64>,
    stmt: &PreparedStatement,
    params: &[Value],
) -> impl Future<Output = Outcome<ExecResult, Error>> + Send {
    let cancelled = cx.cancel_reason();
    let state = Arc::clone(state);
    let label = label.to_string();
    let stmt = stmt.clone();
    let params = params.to_vec();
    async move {
        if let Some(reason) = cancelled {
            return Outcome::Cancelled(reason);
        }
        let mut guard = lock(&state);
        match run_recorded(&mut guard, &label, EventKind::Execute, transaction, &stmt, &params) {
            Ok(()) => Outcome::Ok(guard.result_for(stmt.sql())),
            Err(e) => Outcome::Err(e),
        }
    }
}

impl Executor for MemoryConnection {
    fn prepare(
        &self,
        cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send {
        prepare_statement(cx, &self.db.state, &self.label, None, sql)
    }

    fn close_prepared(&self, _cx: &Cx, stmt: PreparedStatement) -> impl Future<Output = Result<()>> + Send {
        close_statement(&self.db.state, &self.label, None, &stmt)
    }

    fn query_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        query_recorded(cx, &self.db.state, &self.label, None, stmt, params)
    }

    fn execute_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send {
        execute_recorded(cx, &self.db.state, &self.label, None, stmt, params)
    }
}

impl Connection for MemoryConnection {
    type Tx = MemoryTx;

    fn begin_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx, Error>> + Send {
        let cancelled = cx.cancel_reason();
        let db = self.db.clone();
        let label = self.label.clone();
        async move {
            if let Some(reason) = cancelled {
                return Outcome::Cancelled(reason);
            }
            let id = {
                let mut state = lock(&db.state);
                state.next_tx += 1;
                let id = state.next_tx;
                state.record(&label, EventKind::Begin, Some(id), None, &[]);
                id
            };
            tracing::trace!(label = %label, tx = id, isolation = isolation.as_sql(), "memory transaction begun");
            Outcome::Ok(MemoryTx {
                db,
                label,
                id,
                finished: Mutex::new(false),
            })
        }
    }

    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let cancelled = cx.cancel_reason();
        async move {
            match cancelled {
                Some(reason) => Outcome::Cancelled(reason),
                None => Outcome::Ok(()),
            }
        }
    }
}

impl Connect for MemoryConnection {
    /// Open `mem://<database>/<label>`; the label defaults to `primary`.
    fn connect(
        cx: &Cx,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Outcome<Self, Error>> + Send {
        let cancelled = cx.cancel_reason();
        let url = config.url.clone();
        async move {
            if let Some(reason) = cancelled {
                return Outcome::Cancelled(reason);
            }
            let Some(rest) = url.strip_prefix("mem://") else {
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("unsupported url `{url}`, expected mem://<database>/<label>"),
                    source: None,
                }));
            };
            let (name, label) = rest.split_once('/').unwrap_or((rest, "primary"));
            if name.is_empty() {
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("url `{url}` names no database"),
                    source: None,
                }));
            }
            let label = if label.is_empty() { "primary" } else { label };
            Outcome::Ok(MemoryDatabase::named(name).connection(label))
        }
    }
}

/// A transaction on a [`MemoryDatabase`].
///
/// Its statements are recorded under its id; they count as committed once
/// [`TransactionOps::commit`] succeeds.
#[derive(Debug)]
pub struct MemoryTx {
    db: MemoryDatabase,
    label: String,
    id: u64,
    finished: Mutex<bool>,
}

fn finished_error() -> Error {
    Error::transaction(TransactionErrorKind::Finished, "transaction already finished")
}

impl MemoryTx {
    /// Id the transaction's events are recorded under.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if *lock(&self.finished) {
            return Err(finished_error());
        }
        Ok(())
    }

    fn finish(&self, commit: bool) -> Result<()> {
        let mut finished = lock(&self.finished);
        if *finished {
            return Err(finished_error());
        }
        *finished = true;
        let mut state = lock(&self.db.state);
        let kind = if commit { EventKind::Commit } else { EventKind::Rollback };
        state.record(&self.label, kind, Some(self.id), None, &[]);
        let injected = if commit {
            std::mem::take(&mut state.fail_next_commit)
        } else {
            std::mem::take(&mut state.fail_next_rollback)
        };
        if injected {
            let step = if commit { "commit" } else { "rollback" };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("injected {step} failure"),
                source: None,
            }));
        }
        if commit {
            state.committed.insert(self.id);
        }
        Ok(())
    }
}

impl Executor for MemoryTx {
    fn prepare(
        &self,
        cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send {
        let open = self.ensure_open();
        let prepared = prepare_statement(cx, &self.db.state, &self.label, Some(self.id), sql);
        async move {
            match open {
                Ok(()) => prepared.await,
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn close_prepared(&self, _cx: &Cx, stmt: PreparedStatement) -> impl Future<Output = Result<()>> + Send {
        close_statement(&self.db.state, &self.label, Some(self.id), &stmt)
    }

    fn query_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let open = self.ensure_open();
        let query = query_recorded(cx, &self.db.state, &self.label, Some(self.id), stmt, params);
        async move {
            match open {
                Ok(()) => query.await,
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn execute_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send {
        let open = self.ensure_open();
        let exec = execute_recorded(cx, &self.db.state, &self.label, Some(self.id), stmt, params);
        async move {
            match open {
                Ok(()) => exec.await,
                Err(e) => Outcome::Err(e),
            }
        }
    }
}

impl TransactionOps for MemoryTx {
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let cancelled = cx.cancel_reason();
        async move {
            if let Some(reason) = cancelled {
                return Outcome::Cancelled(reason);
            }
            match self.finish(true) {
                Ok(()) => Outcome::Ok(()),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        // a rollback must still run once the context is cancelled
        async move {
            match self.finish(false) {
                Ok(()) => Outcome::Ok(()),
                Err(e) => Outcome::Err(e),
            }
        }
    }
}
