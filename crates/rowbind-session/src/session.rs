//! The per-operation session.

use crate::context::OrmContext;
use crate::hooks::{HookEvent, HookRegistry};
use crate::tx::TxScope;
use asupersync::Outcome;
use rowbind_core::{
    Connection, Destination, Error, ExecResult, MappingError, MappingErrorKind, Model,
    Rows, RowCursor, SchemaMapper, Value, execute, fetch, scan,
};
use rowbind_pool::{RouteHint, SqlAction, Storage};
use rowbind_query::{
    PlaceholderStyle, Predicate, SelectStatement, Statement, StatementKind,
    UpdateStatement, insert, select, update,
};
use std::fmt;
use std::sync::Arc;

/// Runs operations against one storage.
///
/// A session is cheap and meant to live for one request or call chain. It
/// latches the first error it sees: once set, every later operation returns
/// that error without touching the database. Use [`Session::take_error`]
/// to clear it.
///
/// Typed operations take their table from [`Model::TABLE_NAME`] and their
/// columns from the storage's schema mapper. A statement set with
/// [`Session::with_statement`] supplies filters, ordering and paging and is
/// consumed by the next operation of its kind.
pub struct Session<C: Connection> {
    pub(crate) storage: Arc<Storage<C>>,
    hooks: Arc<HookRegistry<C>>,
    action: SqlAction,
    pub(crate) force_primary: bool,
    pub(crate) tx: Option<Arc<TxScope<C>>>,
    /// Holds this session took on its scope and has not released yet
    pub(crate) joins: usize,
    error: Option<Error>,
    statement: Option<Statement>,
}

impl<C: Connection> Session<C> {
    pub fn new(storage: Arc<Storage<C>>, hooks: Arc<HookRegistry<C>>) -> Self {
        Self {
            storage,
            hooks,
            action: SqlAction::Select,
            force_primary: false,
            tx: None,
            joins: 0,
            error: None,
            statement: None,
        }
    }

    // ==================== Accessors ====================

    /// The storage this session is bound to.
    pub fn storage(&self) -> &Arc<Storage<C>> {
        &self.storage
    }

    pub fn storage_name(&self) -> &str {
        self.storage.name()
    }

    /// The storage's schema mapper.
    pub fn mapper(&self) -> &Arc<SchemaMapper> {
        self.storage.mapper()
    }

    /// Placeholder style statements are rendered with.
    pub fn placeholder(&self) -> PlaceholderStyle {
        self.storage.placeholder()
    }

    /// The action of the current or most recent operation.
    pub fn action(&self) -> SqlAction {
        self.action
    }

    /// Whether reads are pinned to the primary.
    pub fn is_force_primary(&self) -> bool {
        self.force_primary
    }

    /// The transaction scope this session runs in, if any.
    pub fn scope(&self) -> Option<&Arc<TxScope<C>>> {
        self.tx.as_ref()
    }

    /// The latched error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Latch `err` unless an earlier error is already latched.
    pub fn set_error(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Clear and return the latched error.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Send reads to the primary even without a transaction.
    pub fn force_primary(&mut self) -> &mut Self {
        self.force_primary = true;
        self
    }

    /// Set the statement the next operation of its kind uses.
    pub fn with_statement(&mut self, statement: impl Into<Statement>) -> &mut Self {
        self.statement = Some(statement.into());
        self
    }

    /// Graft another session's transactional state onto this one: its
    /// scope, primary pinning, and latched error.
    pub fn copy_from(&mut self, other: &Session<C>) {
        self.tx = other.tx.clone();
        self.force_primary = other.force_primary;
        if let Some(err) = &other.error {
            self.set_error(err.clone());
        }
    }

    /// Run in `scope` without taking a hold on it.
    pub(crate) fn graft(&mut self, scope: Arc<TxScope<C>>) {
        tracing::debug!(storage = %self.storage_name(), "read joined ambient transaction");
        self.tx = Some(scope);
        self.force_primary = true;
    }

    /// The session's transaction, forgetting it once it has finished.
    fn live_scope(&mut self) -> Option<Arc<TxScope<C>>> {
        if self.tx.as_ref().is_some_and(|scope| scope.is_finished()) {
            self.tx = None;
        }
        self.tx.clone()
    }

    fn route_hint(&self) -> RouteHint {
        RouteHint::new(self.action, self.force_primary)
    }

    fn fail<T>(&mut self, err: Error) -> Outcome<T, Error> {
        self.set_error(err.clone());
        Outcome::Err(err)
    }

    fn latched<T>(&self) -> Option<Outcome<T, Error>> {
        self.error.clone().map(Outcome::Err)
    }

    fn take_statement(&mut self, kind: StatementKind) -> Result<Option<Statement>, Error> {
        match self.statement.take() {
            Some(st) if st.kind() == kind => Ok(Some(st)),
            Some(st) => Err(Error::config(format!(
                "pending {} statement cannot run as {kind}",
                st.kind()
            ))),
            None => Ok(None),
        }
    }

    /// The pending select statement; reads need one.
    fn take_select(&mut self) -> Result<SelectStatement, Error> {
        match self.take_statement(StatementKind::Select)? {
            Some(Statement::Select(st)) => Ok(st),
            _ => Err(Error::config("select needs a pending select statement")),
        }
    }

    /// The pending select statement, or one selecting every mapped column.
    fn take_select_or_all(&mut self) -> Result<SelectStatement, Error> {
        match self.take_statement(StatementKind::Select)? {
            Some(Statement::Select(st)) => Ok(st),
            _ => Ok(select(["*"])),
        }
    }

    // ==================== Pipeline ====================

    async fn dispatch(&mut self, ctx: &OrmContext<'_, C>, event: HookEvent) {
        let hooks = Arc::clone(&self.hooks);
        hooks.dispatch(ctx, event, self).await;
    }

    /// Start an operation: set the action and run the before-hooks.
    ///
    /// If a before-hook fails after the session took a hold on a
    /// transaction, that hold is released with a rollback.
    async fn prologue(&mut self, ctx: &OrmContext<'_, C>, action: SqlAction) -> Outcome<(), Error> {
        self.action = action;
        if let Some(latched) = self.latched() {
            return latched;
        }
        if let Some(reason) = ctx.cx().cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let joins = self.joins;
        self.dispatch(ctx, HookEvent::before(action)).await;
        if let Some(err) = self.error.clone() {
            if self.joins > joins {
                if let Outcome::Err(e) = self.rollback(ctx.cx()).await {
                    tracing::error!(error = %e, "rollback after failed before-hook failed");
                }
            }
            return Outcome::Err(err);
        }
        Outcome::Ok(())
    }

    /// Finish an operation: latch its failure and always run the
    /// after-hooks. An error the after-hooks latch (a failed commit)
    /// replaces a successful result.
    async fn epilogue<T>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        action: SqlAction,
        outcome: Outcome<T, Error>,
    ) -> Outcome<T, Error> {
        match &outcome {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => self.set_error(e.clone()),
            Outcome::Cancelled(_) => self.set_error(Error::Cancelled),
            Outcome::Panicked(_) => self.set_error(Error::Custom("driver panicked".to_string())),
        }
        self.dispatch(ctx, HookEvent::after(action)).await;
        match outcome {
            Outcome::Ok(value) => match &self.error {
                Some(err) => Outcome::Err(err.clone()),
                None => Outcome::Ok(value),
            },
            other => other,
        }
    }

    async fn run_query(
        &mut self,
        ctx: &OrmContext<'_, C>,
        action: SqlAction,
        sql: &str,
        args: &[Value],
    ) -> Outcome<Rows, Error> {
        match self.prologue(ctx, action).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        tracing::debug!(storage = %self.storage_name(), sql, args = ?args, "query");

        let outcome = match self.live_scope() {
            Some(scope) => fetch(ctx.cx(), scope.transaction(), sql, args).await,
            None => {
                let conn = Arc::clone(self.storage.select(self.route_hint()));
                fetch(ctx.cx(), &*conn, sql, args).await
            }
        };
        self.epilogue(ctx, action, outcome).await
    }

    async fn run_exec(
        &mut self,
        ctx: &OrmContext<'_, C>,
        action: SqlAction,
        sql: &str,
        args: &[Value],
    ) -> Outcome<ExecResult, Error> {
        match self.prologue(ctx, action).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        tracing::debug!(storage = %self.storage_name(), sql, args = ?args, "execute");

        let outcome = match self.live_scope() {
            Some(scope) => execute(ctx.cx(), scope.transaction(), sql, args).await,
            None => {
                let conn = Arc::clone(self.storage.select(self.route_hint()));
                execute(ctx.cx(), &*conn, sql, args).await
            }
        };
        self.epilogue(ctx, action, outcome).await
    }

    async fn select_statement<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        mut st: SelectStatement,
        dest: Destination<'_, M>,
    ) -> Outcome<(), Error> {
        let mapper = Arc::clone(self.storage.mapper());
        match mapper.columns::<M>() {
            Ok(columns) => st.fill_columns(columns),
            Err(e) => return self.fail(e),
        }
        st.fill_table(M::TABLE_NAME);
        st.set_placeholder(self.placeholder());
        let (sql, args) = match st.to_sql() {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };

        let mut rows = match self.run_query(ctx, SqlAction::Select, &sql, &args).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match scan(&mapper, dest, &mut rows) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => self.fail(e),
        }
    }

    // ==================== Typed operations ====================

    /// Select rows of `M` into `dest`.
    ///
    /// Runs the pending select statement, which supplies filters, ordering
    /// and paging. A `*` or empty column list selects every mapped column.
    /// Without a pending statement this is a configuration error.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn select<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        dest: Destination<'_, M>,
    ) -> Outcome<(), Error> {
        if let Some(latched) = self.latched() {
            return latched;
        }
        let st = match self.take_select() {
            Ok(st) => st,
            Err(e) => return self.fail(e),
        };
        self.select_statement(ctx, st, dest).await
    }

    /// Select like [`Session::select`], then count every row the statement
    /// matches, ignoring ordering and paging.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn select_with_count<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        dest: Destination<'_, M>,
    ) -> Outcome<u64, Error> {
        if let Some(latched) = self.latched() {
            return latched;
        }
        let mut st = match self.take_select() {
            Ok(st) => st,
            Err(e) => return self.fail(e),
        };
        st.fill_table(M::TABLE_NAME);
        st.set_placeholder(self.placeholder());
        let counter = st.count();

        match self.select_statement(ctx, st, dest).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let (sql, args) = match counter.to_sql() {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };
        let mut rows = match self.run_query(ctx, SqlAction::Select, &sql, &args).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let count = match rows.next_row() {
            Ok(Some(row)) => row.get_as::<i64>(0),
            Ok(None) => Ok(0),
            Err(e) => Err(e),
        };
        if let Err(e) = rows.close() {
            tracing::error!(error = %e, "failed to close count cursor");
        }
        match count {
            Ok(n) => Outcome::Ok(u64::try_from(n).unwrap_or(0)),
            Err(e) => self.fail(e),
        }
    }

    /// Select the `M` whose primary key equals `key`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn select_by_key<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        key: impl Into<Value>,
    ) -> Outcome<Option<M>, Error> {
        let pk = match self.mapper().load::<M>().and_then(|m| m.primary_key().map(|f| f.name.clone())) {
            Ok(pk) => pk,
            Err(e) => return self.fail(e),
        };
        let st = match self.take_select_or_all() {
            Ok(st) => st.filter(Predicate::eq(pk, key)),
            Err(e) => return self.fail(e),
        };
        let mut found = Vec::with_capacity(1);
        match self.select_statement(ctx, st, Destination::Many(&mut found)).await {
            Outcome::Ok(()) => Outcome::Ok(found.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Select every `M` whose primary key is in `keys`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn select_by_keys<M: Model, K: Into<Value>>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        keys: impl IntoIterator<Item = K>,
    ) -> Outcome<Vec<M>, Error> {
        let pk = match self.mapper().load::<M>().and_then(|m| m.primary_key().map(|f| f.name.clone())) {
            Ok(pk) => pk,
            Err(e) => return self.fail(e),
        };
        let st = match self.take_select_or_all() {
            Ok(st) => st.filter(Predicate::in_list(pk, keys)),
            Err(e) => return self.fail(e),
        };
        let mut found = Vec::new();
        match self.select_statement(ctx, st, Destination::Many(&mut found)).await {
            Outcome::Ok(()) => Outcome::Ok(found),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Insert one record.
    pub async fn insert<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        record: &M,
    ) -> Outcome<ExecResult, Error> {
        self.insert_many(ctx, std::slice::from_ref(record)).await
    }

    /// Insert records with one multi-row statement.
    ///
    /// Read-only columns are never written. The column list comes from the
    /// first record: a primary key whose value is zero there is left out so
    /// the database can generate it.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME, rows = records.len()))]
    pub async fn insert_many<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        records: &[M],
    ) -> Outcome<ExecResult, Error> {
        if let Some(latched) = self.latched() {
            return latched;
        }
        let (sql, args) = match self.build_insert(records) {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };
        self.run_exec(ctx, SqlAction::Insert, &sql, &args).await
    }

    fn build_insert<M: Model>(&self, records: &[M]) -> Result<(String, Vec<Value>), Error> {
        let Some(first) = records.first() else {
            return Err(Error::config("insert needs at least one record"));
        };
        let mapper = self.mapper().load::<M>()?;

        let mut fields = Vec::new();
        for field in mapper.columns() {
            if field.read_only {
                continue;
            }
            if field.primary_key && first.get_field(&field.index)?.is_zero() {
                continue;
            }
            fields.push(field);
        }

        let mut st = insert()
            .into_table(M::TABLE_NAME)
            .columns(fields.iter().map(|f| f.name.clone()))
            .placeholder(self.placeholder());
        for record in records {
            let row = fields
                .iter()
                .map(|f| record.get_field(&f.index))
                .collect::<Result<Vec<_>, _>>()?;
            st = st.values(row);
        }
        st.to_sql()
    }

    /// Run the pending update statement against `M`'s table.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn update<M: Model>(&mut self, ctx: &OrmContext<'_, C>) -> Outcome<ExecResult, Error> {
        if let Some(latched) = self.latched() {
            return latched;
        }
        let built = match self.take_statement(StatementKind::Update) {
            Ok(Some(Statement::Update(mut st))) => {
                st.fill_table(M::TABLE_NAME);
                st.set_placeholder(self.placeholder());
                st.to_sql()
            }
            Ok(_) => Err(Error::config("update needs a pending update statement")),
            Err(e) => Err(e),
        };
        let (sql, args) = match built {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };
        self.run_exec(ctx, SqlAction::Update, &sql, &args).await
    }

    /// Update a record by its primary key.
    ///
    /// Every writable, non-key column is set from the record; every
    /// primary-key column becomes an equality filter.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn update_by_model<M: Model>(
        &mut self,
        ctx: &OrmContext<'_, C>,
        record: &M,
    ) -> Outcome<ExecResult, Error> {
        if let Some(latched) = self.latched() {
            return latched;
        }
        let (sql, args) = match self.build_update_by_model(record) {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };
        self.run_exec(ctx, SqlAction::Update, &sql, &args).await
    }

    fn build_update_by_model<M: Model>(&self, record: &M) -> Result<(String, Vec<Value>), Error> {
        let mapper = self.mapper().load::<M>()?;
        let mut st: UpdateStatement = update()
            .table_name(M::TABLE_NAME)
            .placeholder(self.placeholder());
        let mut keyed = false;
        for field in mapper.columns() {
            let value = record.get_field(&field.index)?;
            if field.primary_key {
                st = st.filter(Predicate::eq(field.name.clone(), value));
                keyed = true;
            } else if !field.read_only {
                st = st.set(field.name.clone(), value);
            }
        }
        if !keyed {
            return Err(Error::Mapping(MappingError {
                kind: MappingErrorKind::MissingPrimaryKey,
                record: M::shape().name,
                column: None,
                message: "update by model needs a primary key column".to_string(),
            }));
        }
        st.to_sql()
    }

    /// Run the pending delete statement against `M`'s table.
    #[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
    pub async fn delete<M: Model>(&mut self, ctx: &OrmContext<'_, C>) -> Outcome<ExecResult, Error> {
        if let Some(latched) = self.latched() {
            return latched;
        }
        let built = match self.take_statement(StatementKind::Delete) {
            Ok(Some(Statement::Delete(mut st))) => {
                st.fill_table(M::TABLE_NAME);
                st.set_placeholder(self.placeholder());
                st.to_sql()
            }
            Ok(_) => Err(Error::config("delete needs a pending delete statement")),
            Err(e) => Err(e),
        };
        let (sql, args) = match built {
            Ok(built) => built,
            Err(e) => return self.fail(e),
        };
        self.run_exec(ctx, SqlAction::Delete, &sql, &args).await
    }

    // ==================== Raw operations ====================

    /// Run raw query text for rows, with hooks and routing as for
    /// [`Session::select`].
    pub async fn select_x(
        &mut self,
        ctx: &OrmContext<'_, C>,
        sql: &str,
        args: &[Value],
    ) -> Outcome<Rows, Error> {
        self.run_query(ctx, SqlAction::Select, sql, args).await
    }

    /// Run raw insert text.
    pub async fn insert_x(
        &mut self,
        ctx: &OrmContext<'_, C>,
        sql: &str,
        args: &[Value],
    ) -> Outcome<ExecResult, Error> {
        self.run_exec(ctx, SqlAction::Insert, sql, args).await
    }

    /// Run raw update text.
    pub async fn update_x(
        &mut self,
        ctx: &OrmContext<'_, C>,
        sql: &str,
        args: &[Value],
    ) -> Outcome<ExecResult, Error> {
        self.run_exec(ctx, SqlAction::Update, sql, args).await
    }

    /// Run raw delete text.
    pub async fn delete_x(
        &mut self,
        ctx: &OrmContext<'_, C>,
        sql: &str,
        args: &[Value],
    ) -> Outcome<ExecResult, Error> {
        self.run_exec(ctx, SqlAction::Delete, sql, args).await
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("storage", &self.storage.name())
            .field("action", &self.action)
            .field("force_primary", &self.force_primary)
            .field("tx", &self.tx)
            .field("error", &self.error)
            .field("statement", &self.statement)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, EventKind, MemoryConnection, MemoryDatabase};
    use asupersync::Cx;
    use asupersync::runtime::RuntimeBuilder;
    use rowbind_core::{FieldShape, Record, RecordShape, invalid_path};
    use rowbind_pool::{ReplicaSet, Route, StorageConfig};
    use rowbind_query::{DeleteStatement, Order};

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            other => std::panic::panic_any(format!("expected an error, got {other:?}")),
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Item {
        id: i64,
        name: String,
        created_at: Option<i64>,
    }

    impl Record for Item {
        fn shape() -> &'static RecordShape {
            static SHAPE: RecordShape = RecordShape {
                name: "Item",
                fields: &[
                    FieldShape::leaf("ID", Some("pk"), true),
                    FieldShape::leaf("Name", None, true),
                    FieldShape::leaf("CreatedAt", Some("readonly"), true),
                ],
            };
            &SHAPE
        }

        fn get_field(&self, path: &[usize]) -> rowbind_core::Result<Value> {
            match path {
                [0] => Ok(Value::from(self.id)),
                [1] => Ok(Value::from(self.name.clone())),
                [2] => Ok(Value::from(self.created_at)),
                _ => Err(invalid_path::<Self>(path)),
            }
        }

        fn set_field(&mut self, path: &[usize], value: &Value) -> rowbind_core::Result<()> {
            use rowbind_core::FromValue;
            match path {
                [0] => self.id = i64::from_value(value)?,
                [1] => self.name = String::from_value(value)?,
                [2] => self.created_at = Option::<i64>::from_value(value)?,
                _ => return Err(invalid_path::<Self>(path)),
            }
            Ok(())
        }
    }

    impl Model for Item {
        const TABLE_NAME: &'static str = "items";
    }

    fn item(id: i64, name: &str) -> Item {
        Item {
            id,
            name: name.to_string(),
            created_at: None,
        }
    }

    fn simple(db: &MemoryDatabase) -> Session<MemoryConnection> {
        let storage = Arc::new(Storage::new(
            &StorageConfig::new("main"),
            Route::simple(db.connection("primary")),
        ));
        Session::new(storage, Arc::new(HookRegistry::with_transaction_hooks()))
    }

    /// Answer selects on `items` with `rows`.
    fn respond_items(db: &MemoryDatabase, pattern: &str, rows: &[Item]) {
        db.respond(
            pattern,
            ["id", "name", "created_at"],
            rows.iter()
                .map(|i| vec![Value::BigInt(i.id), Value::from(i.name.clone()), Value::from(i.created_at)]),
        );
    }

    #[test]
    fn insert_then_select_by_key() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        db.respond_exec(
            "INSERT INTO items",
            ExecResult {
                rows_affected: 1,
                last_insert_id: Some(4),
            },
        );
        respond_items(&db, "FROM items WHERE id = ", &[item(4, "first")]);
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let res = unwrap_outcome(session.insert(&ctx, &item(0, "first")).await);
            assert_eq!(res.rows_affected, 1);
            let id = res.last_insert_id.expect("generated id");

            let found: Option<Item> = unwrap_outcome(session.select_by_key(&ctx, id).await);
            assert_eq!(found, Some(item(id, "first")));

            db.clear_responses();
            let missing: Option<Item> = unwrap_outcome(session.select_by_key(&ctx, 999_i64).await);
            assert_eq!(missing, None);
        });
        // the insert committed its own transaction
        assert_eq!(db.count(EventKind::Begin), 1);
        assert_eq!(db.count(EventKind::Commit), 1);
        assert_eq!(db.committed_sql(), vec!["INSERT INTO items (name) VALUES (?)"]);
        let reads: Vec<Event> = db.events().into_iter().filter(|e| e.kind == EventKind::Query).collect();
        assert_eq!(
            reads[0].sql.as_deref(),
            Some("SELECT id, name, created_at FROM items WHERE id = ?")
        );
        assert_eq!(reads[0].params, vec![Value::BigInt(4)]);
        assert_eq!(reads[1].params, vec![Value::BigInt(999)]);
    }

    #[test]
    fn explicit_key_is_written() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        respond_items(&db, "FROM items", &[item(10, "a"), item(11, "b")]);
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            unwrap_outcome(session.insert_many(&ctx, &[item(10, "a"), item(11, "b")]).await);
            let rows: Vec<Item> = unwrap_outcome(session.select_by_keys(&ctx, [10_i64, 11]).await);
            assert_eq!(rows, vec![item(10, "a"), item(11, "b")]);
        });
        assert_eq!(
            db.executed_sql(),
            vec![
                "INSERT INTO items (id, name) VALUES (?, ?), (?, ?)",
                "SELECT id, name, created_at FROM items WHERE id IN (?, ?)",
            ]
        );
    }

    #[test]
    fn select_with_count_ignores_paging() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        respond_items(&db, "FROM items", &[item(5, "n5"), item(4, "n4")]);
        db.respond("SELECT COUNT(1) FROM items", ["COUNT(1)"], [vec![Value::BigInt(5)]]);
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            session.with_statement(
                select(["*"])
                    .filter(Predicate::raw("id > ?", vec![Value::BigInt(0)]))
                    .order_by(Order::desc("id"))
                    .limit(2),
            );
            let mut page: Vec<Item> = Vec::new();
            let total = unwrap_outcome(session.select_with_count(&ctx, Destination::Many(&mut page)).await);
            assert_eq!(total, 5);
            assert_eq!(page.iter().map(|i| i.id).collect::<Vec<_>>(), vec![5, 4]);
        });
        assert_eq!(
            db.executed_sql(),
            vec![
                "SELECT id, name, created_at FROM items WHERE (id > ?) ORDER BY id DESC LIMIT 2",
                "SELECT COUNT(1) FROM items WHERE (id > ?)",
            ]
        );
    }

    #[test]
    fn update_by_model_sets_writable_columns() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let mut changed = item(3, "new");
            changed.created_at = Some(1);
            let res = unwrap_outcome(session.update_by_model(&ctx, &changed).await);
            assert_eq!(res.rows_affected, 1);
        });
        let update = db
            .events()
            .into_iter()
            .find(|e| e.kind == EventKind::Execute)
            .expect("update ran");
        assert_eq!(update.sql.as_deref(), Some("UPDATE items SET name = ? WHERE id = ?"));
        assert_eq!(update.params, vec![Value::from("new"), Value::BigInt(3)]);
    }

    #[test]
    fn delete_uses_pending_statement() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            session.with_statement(DeleteStatement::default().filter(Predicate::eq("id", 1_i64)));
            let res = unwrap_outcome(session.delete::<Item>(&ctx).await);
            assert_eq!(res.rows_affected, 1);
        });
        assert_eq!(db.committed_sql(), vec!["DELETE FROM items WHERE id = ?"]);
    }

    #[test]
    fn delete_without_statement_deletes_nothing() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let err = expect_err(session.delete::<Item>(&ctx).await);
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains("delete needs a pending delete statement"));
            assert!(session.take_error().is_some());
        });
        let deletes = db
            .events()
            .into_iter()
            .filter(|e| e.sql.as_deref().is_some_and(|sql| sql.starts_with("DELETE")))
            .count();
        assert_eq!(deletes, 0);
        assert!(db.events().is_empty());
    }

    #[test]
    fn select_without_statement_is_config_error() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        respond_items(&db, "FROM items", &[item(1, "a")]);
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let mut all: Vec<Item> = Vec::new();
            let err = expect_err(session.select(&ctx, Destination::Many(&mut all)).await);
            assert!(matches!(err, Error::Config(_)));
            assert!(session.take_error().is_some());

            let err = expect_err(session.select_with_count(&ctx, Destination::Many(&mut all)).await);
            assert!(matches!(err, Error::Config(_)));
            assert!(session.take_error().is_some());
            assert!(all.is_empty());

            // key lookups still select every mapped column on their own
            let found: Option<Item> = unwrap_outcome(session.select_by_key(&ctx, 1_i64).await);
            assert_eq!(found, Some(item(1, "a")));
        });
        assert_eq!(db.count(EventKind::Query), 1);
    }

    #[test]
    fn wrong_pending_statement_is_config_error() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            session.with_statement(select(["*"]));
            let err = expect_err(session.update::<Item>(&ctx).await);
            assert!(matches!(err, Error::Config(_)));
        });
        assert!(db.events().is_empty());
    }

    #[test]
    fn failed_write_rolls_back_and_latches() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        db.fail_on("INSERT INTO items");
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let err = expect_err(session.insert(&ctx, &item(1, "a")).await);
            assert!(matches!(err, Error::Query(_)));
            assert!(session.scope().is_none());

            // latched: the next operation does not reach the database
            let before = db.events().len();
            let again = expect_err(session.select_by_key::<Item>(&ctx, 1_i64).await);
            assert_eq!(again.to_string(), err.to_string());
            assert_eq!(db.events().len(), before);

            assert!(session.take_error().is_some());
            let found: Option<Item> = unwrap_outcome(session.select_by_key(&ctx, 1_i64).await);
            assert!(found.is_none());
        });
        assert_eq!(db.count(EventKind::Rollback), 1);
        assert_eq!(db.count(EventKind::Commit), 0);
        assert!(db.committed_sql().is_empty());
    }

    #[test]
    fn failed_commit_is_returned() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        db.fail_next_commit();
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let err = expect_err(session.insert(&ctx, &item(1, "a")).await);
            assert!(err.to_string().contains("commit"));
        });
        assert!(db.committed_sql().is_empty());
    }

    #[test]
    fn update_by_model_without_key_is_mapping_error() {
        #[derive(Debug, Default)]
        struct Keyless {
            name: String,
        }
        impl Record for Keyless {
            fn shape() -> &'static RecordShape {
                static SHAPE: RecordShape = RecordShape {
                    name: "Keyless",
                    fields: &[FieldShape::leaf("Name", None, true)],
                };
                &SHAPE
            }
            fn get_field(&self, path: &[usize]) -> rowbind_core::Result<Value> {
                match path {
                    [0] => Ok(Value::from(self.name.clone())),
                    _ => Err(invalid_path::<Self>(path)),
                }
            }
            fn set_field(&mut self, path: &[usize], _value: &Value) -> rowbind_core::Result<()> {
                Err(invalid_path::<Self>(path))
            }
        }
        impl Model for Keyless {
            const TABLE_NAME: &'static str = "keyless";
        }

        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let mut session = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let err = expect_err(session.update_by_model(&ctx, &Keyless::default()).await);
            assert_eq!(err.mapping_kind(), Some(MappingErrorKind::MissingPrimaryKey));
        });
        assert!(db.events().is_empty());
    }

    #[test]
    fn reads_use_replicas_and_writes_the_primary() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let storage = Arc::new(Storage::new(
            &StorageConfig::new("main"),
            Route::Replicated(ReplicaSet::new(
                db.connection("primary"),
                vec![db.connection("r1"), db.connection("r2")],
            )),
        ));
        let hooks = Arc::new(HookRegistry::with_transaction_hooks());
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let mut writer = Session::new(Arc::clone(&storage), Arc::clone(&hooks));
            unwrap_outcome(writer.insert(&ctx, &item(1, "a")).await);

            for _ in 0..4 {
                let mut reader = Session::new(Arc::clone(&storage), Arc::clone(&hooks));
                let _: Option<Item> = unwrap_outcome(reader.select_by_key(&ctx, 1_i64).await);
            }
            let mut pinned = Session::new(Arc::clone(&storage), Arc::clone(&hooks));
            pinned.force_primary();
            let _: Option<Item> = unwrap_outcome(pinned.select_by_key(&ctx, 1_i64).await);
        });
        assert_eq!(db.queries_on("r1"), 2);
        assert_eq!(db.queries_on("r2"), 2);
        assert_eq!(db.queries_on("primary"), 1);
        let begin = db
            .events()
            .into_iter()
            .find(|e| e.kind == EventKind::Begin)
            .expect("write began a transaction");
        assert_eq!(begin.label, "primary");
    }

    #[test]
    fn copy_from_grafts_transaction_state() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let db = MemoryDatabase::new();
        let mut owner = simple(&db);
        let mut other = simple(&db);
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            unwrap_outcome(owner.begin_tx(&ctx).await);
            other.copy_from(&owner);
            assert!(other.is_force_primary());
            assert!(Arc::ptr_eq(
                other.scope().expect("scope"),
                owner.scope().expect("scope")
            ));
            unwrap_outcome(owner.commit(&cx).await);
        });
    }
}
