//! Nested transaction scopes.
//!
//! A [`TxScope`] owns one live driver transaction and counts how many
//! sessions currently hold it open. Commit and rollback on a session
//! release one hold; only the release that brings the count to zero talks
//! to the database. A nested rollback marks the scope rollback-only, so the
//! outermost commit rolls back instead and reports it.

use crate::context::OrmContext;
use crate::session::Session;
use asupersync::{Cx, Outcome};
use futures::FutureExt;
use futures::future::BoxFuture;
use rowbind_core::{Connection, Error, TransactionError, TransactionErrorKind, TransactionOps};
use rowbind_pool::Storage;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ScopeState {
    depth: usize,
    finished: bool,
    rollback_only: bool,
}

/// What releasing one hold on a scope asks of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// Other holders remain
    Nested,
    Commit,
    Rollback,
}

/// A live transaction shared by every session that joined it.
pub struct TxScope<C: Connection> {
    storage: Arc<Storage<C>>,
    tx: C::Tx,
    state: Mutex<ScopeState>,
}

impl<C: Connection> TxScope<C> {
    fn new(storage: Arc<Storage<C>>, tx: C::Tx) -> Self {
        Self {
            storage,
            tx,
            state: Mutex::new(ScopeState {
                depth: 1,
                ..ScopeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn storage_name(&self) -> &str {
        self.storage.name()
    }

    /// The driver transaction statements run against.
    pub fn transaction(&self) -> &C::Tx {
        &self.tx
    }

    /// Number of holds still open.
    pub fn depth(&self) -> usize {
        self.state().depth
    }

    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    pub fn is_rollback_only(&self) -> bool {
        self.state().rollback_only
    }

    fn join(&self) -> usize {
        let mut state = self.state();
        assert!(
            !state.finished,
            "cannot join a transaction on storage `{}` that already finished",
            self.storage.name()
        );
        state.depth += 1;
        state.depth
    }

    /// Release one hold.
    ///
    /// # Panics
    ///
    /// Releasing a scope that already finished is a programming error: it
    /// means commit or rollback was called more often than begin.
    fn settle(&self, commit: bool) -> Settle {
        let mut state = self.state();
        assert!(
            !state.finished,
            "transaction on storage `{}` released more times than it was begun",
            self.storage.name()
        );
        state.depth -= 1;
        if !commit {
            state.rollback_only = true;
        }
        if state.depth > 0 {
            return Settle::Nested;
        }
        state.finished = true;
        if state.rollback_only {
            Settle::Rollback
        } else {
            Settle::Commit
        }
    }
}

impl<C: Connection> fmt::Debug for TxScope<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("TxScope")
            .field("storage", &self.storage.name())
            .field("depth", &state.depth)
            .field("finished", &state.finished)
            .field("rollback_only", &state.rollback_only)
            .finish()
    }
}

fn no_active_transaction(op: &str) -> Error {
    Error::transaction(
        TransactionErrorKind::NoActiveTransaction,
        format!("{op} called without an active transaction"),
    )
}

fn rollback_failed(original: Error, rollback: &Error) -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::RollbackFailed,
        message: format!("rollback after `{original}` failed: {rollback}"),
        source: Some(Arc::new(original)),
    })
}

impl<C: Connection> Session<C> {
    /// Begin a transaction, or join the one already open.
    ///
    /// The session's own open scope is joined first, then an ambient scope
    /// for the same storage in `ctx`. Otherwise a new transaction is opened
    /// on the primary and the session is pinned to the primary for reads.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn begin_tx(&mut self, ctx: &OrmContext<'_, C>) -> Outcome<(), Error> {
        if let Some(scope) = self.tx.as_ref().filter(|scope| !scope.is_finished()) {
            let depth = scope.join();
            self.joins += 1;
            tracing::debug!(storage = %self.storage_name(), depth, "joined session transaction");
            return Outcome::Ok(());
        }

        if let Some(scope) = ctx.scope_for(self.storage_name()) {
            let depth = scope.join();
            self.tx = Some(Arc::clone(scope));
            self.force_primary = true;
            self.joins += 1;
            tracing::debug!(storage = %self.storage_name(), depth, "joined ambient transaction");
            return Outcome::Ok(());
        }

        if let Some(reason) = ctx.cx().cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        self.force_primary = true;
        let conn = Arc::clone(self.storage.route().primary());
        match conn.begin(ctx.cx()).await {
            Outcome::Ok(tx) => {
                self.tx = Some(Arc::new(TxScope::new(Arc::clone(&self.storage), tx)));
                self.joins += 1;
                tracing::info!(storage = %self.storage_name(), "transaction started");
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Release one hold on the session's transaction, committing when it
    /// is the last.
    ///
    /// If a nested scope rolled back, the final commit rolls back instead
    /// and returns [`TransactionErrorKind::RolledBack`].
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let Some(scope) = self.tx.clone() else {
            return Outcome::Err(no_active_transaction("commit"));
        };
        self.joins = self.joins.saturating_sub(1);

        match scope.settle(true) {
            Settle::Nested => {
                tracing::debug!(storage = %scope.storage_name(), "nested commit deferred to outer scope");
                Outcome::Ok(())
            }
            Settle::Commit => {
                self.tx = None;
                let outcome = scope.transaction().commit(cx).await;
                if matches!(outcome, Outcome::Ok(())) {
                    tracing::info!(storage = %scope.storage_name(), "transaction committed");
                }
                outcome
            }
            Settle::Rollback => {
                self.tx = None;
                tracing::warn!(
                    storage = %scope.storage_name(),
                    "nested scope rolled back; rolling back instead of committing"
                );
                let rolled_back = Error::transaction(
                    TransactionErrorKind::RolledBack,
                    "transaction was rolled back by a nested scope",
                );
                match scope.transaction().rollback(cx).await {
                    Outcome::Ok(()) => Outcome::Err(rolled_back),
                    Outcome::Err(e) => Outcome::Err(rollback_failed(rolled_back, &e)),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
        }
    }

    /// Release one hold on the session's transaction, rolling back when it
    /// is the last. A nested rollback marks the whole scope rollback-only.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let Some(scope) = self.tx.clone() else {
            return Outcome::Err(no_active_transaction("rollback"));
        };
        self.joins = self.joins.saturating_sub(1);

        match scope.settle(false) {
            Settle::Nested => {
                tracing::debug!(storage = %scope.storage_name(), "nested rollback; scope is now rollback-only");
                Outcome::Ok(())
            }
            Settle::Commit | Settle::Rollback => {
                self.tx = None;
                let outcome = scope.transaction().rollback(cx).await;
                if matches!(outcome, Outcome::Ok(())) {
                    tracing::info!(storage = %scope.storage_name(), "transaction rolled back");
                }
                outcome
            }
        }
    }

    /// Roll back, treating any failure as fatal.
    ///
    /// # Panics
    ///
    /// Panics when the rollback does not succeed.
    pub async fn must_rollback(&mut self, cx: &Cx) {
        match self.rollback(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => panic!("forced rollback failed: {e}"),
            Outcome::Cancelled(r) => panic!("forced rollback cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("forced rollback panicked: {p:?}"),
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// Begins (or joins) a transaction and calls `f` with a context carrying
    /// it, so sessions created inside `f` join the same transaction. `Ok`
    /// commits; `Err` rolls back and returns the error, wrapped as
    /// [`TransactionErrorKind::RollbackFailed`] if the rollback fails too.
    /// A panic inside `f` forces a rollback and then resumes unwinding with
    /// the original payload.
    ///
    /// ```ignore
    /// let id = session
    ///     .transaction(&ctx, |ctx, s| Box::pin(async move {
    ///         let res = match s.insert(ctx, &order).await {
    ///             Outcome::Ok(res) => res,
    ///             other => return other.map(|_| None),
    ///         };
    ///         s.update_by_model(ctx, &stock).await.map(|_| res.last_insert_id)
    ///     }))
    ///     .await;
    /// ```
    pub async fn transaction<T, F>(&mut self, ctx: &OrmContext<'_, C>, f: F) -> Outcome<T, Error>
    where
        T: Send,
        F: for<'s> FnOnce(&'s OrmContext<'s, C>, &'s mut Session<C>) -> BoxFuture<'s, Outcome<T, Error>>,
    {
        match self.begin_tx(ctx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let Some(scope) = self.tx.clone() else {
            return Outcome::Err(no_active_transaction("transaction"));
        };

        let cx = ctx.cx();
        let derived = ctx.with_scope(scope);
        let result = AssertUnwindSafe(f(&derived, self)).catch_unwind().await;

        match result {
            Err(panic) => {
                tracing::warn!(storage = %self.storage_name(), "panic inside transaction; rolling back");
                self.must_rollback(cx).await;
                std::panic::resume_unwind(panic)
            }
            Ok(Outcome::Panicked(p)) => {
                self.must_rollback(cx).await;
                Outcome::Panicked(p)
            }
            Ok(Outcome::Cancelled(r)) => {
                if let Outcome::Err(e) = self.rollback(cx).await {
                    tracing::error!(error = %e, "rollback after cancellation failed");
                }
                Outcome::Cancelled(r)
            }
            Ok(Outcome::Err(err)) => match self.rollback(cx).await {
                Outcome::Ok(()) => Outcome::Err(err),
                Outcome::Err(rb) => Outcome::Err(rollback_failed(err, &rb)),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            Ok(Outcome::Ok(value)) => match self.commit(cx).await {
                Outcome::Ok(()) => Outcome::Ok(value),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventKind, MemoryConnection, MemoryDatabase};
    use asupersync::runtime::RuntimeBuilder;
    use rowbind_pool::{Route, StorageConfig};

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn faulty_body() -> Outcome<(), Error> {
        panic!("fault in transaction body")
    }

    fn fixture() -> (MemoryDatabase, Session<MemoryConnection>) {
        let db = MemoryDatabase::new();
        let storage = Arc::new(Storage::new(
            &StorageConfig::new("main"),
            Route::simple(db.connection("primary")),
        ));
        let session = Session::new(storage, Arc::new(crate::HookRegistry::with_transaction_hooks()));
        (db, session)
    }

    #[test]
    fn commit_without_transaction_is_an_error() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (_db, mut session) = fixture();
        rt.block_on(async {
            match session.commit(&cx).await {
                Outcome::Err(e) => assert_eq!(
                    e.transaction_kind(),
                    Some(TransactionErrorKind::NoActiveTransaction)
                ),
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(matches!(session.rollback(&cx).await, Outcome::Err(_)));
        });
    }

    #[test]
    fn nested_begin_commits_once() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (db, mut session) = fixture();
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            unwrap_outcome(session.begin_tx(&ctx).await);
            unwrap_outcome(session.begin_tx(&ctx).await);
            let scope = Arc::clone(session.scope().expect("scope"));
            assert_eq!(scope.depth(), 2);
            assert!(session.is_force_primary());

            unwrap_outcome(session.commit(&cx).await);
            assert_eq!(db.count(EventKind::Commit), 0);
            assert!(session.scope().is_some());

            unwrap_outcome(session.commit(&cx).await);
            assert_eq!(db.count(EventKind::Commit), 1);
            assert!(scope.is_finished());
            assert!(session.scope().is_none());
        });
    }

    #[test]
    fn nested_rollback_turns_outer_commit_into_rollback() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (db, mut session) = fixture();
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            unwrap_outcome(session.begin_tx(&ctx).await);
            unwrap_outcome(session.begin_tx(&ctx).await);
            unwrap_outcome(session.rollback(&cx).await);
            assert_eq!(db.count(EventKind::Rollback), 0);

            match session.commit(&cx).await {
                Outcome::Err(e) => {
                    assert_eq!(e.transaction_kind(), Some(TransactionErrorKind::RolledBack));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(db.count(EventKind::Commit), 0);
            assert_eq!(db.count(EventKind::Rollback), 1);
        });
    }

    #[test]
    #[should_panic(expected = "released more times than it was begun")]
    fn releasing_finished_scope_panics() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (_db, mut session) = fixture();
        let scope = rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            unwrap_outcome(session.begin_tx(&ctx).await);
            let scope = Arc::clone(session.scope().expect("scope"));
            unwrap_outcome(session.commit(&cx).await);
            scope
        });
        scope.settle(true);
    }

    #[test]
    fn transaction_commits_on_ok() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (db, mut session) = fixture();
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let value = unwrap_outcome(
                session
                    .transaction(&ctx, |ctx, s| {
                        Box::pin(async move {
                            assert!(ctx.scope_for(s.storage_name()).is_some());
                            Outcome::Ok(7)
                        })
                    })
                    .await,
            );
            assert_eq!(value, 7);
            assert_eq!(db.count(EventKind::Begin), 1);
            assert_eq!(db.count(EventKind::Commit), 1);
        });
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (db, mut session) = fixture();
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let outcome: Outcome<(), Error> = session
                .transaction(&ctx, |_ctx, _s| {
                    Box::pin(async { Outcome::Err(Error::Custom("boom".into())) })
                })
                .await;
            match outcome {
                Outcome::Err(Error::Custom(msg)) => assert_eq!(msg, "boom"),
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(db.count(EventKind::Commit), 0);
            assert_eq!(db.count(EventKind::Rollback), 1);
        });
    }

    #[test]
    fn failed_rollback_wraps_original_error() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (db, mut session) = fixture();
        db.fail_next_rollback();
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let outcome: Outcome<(), Error> = session
                .transaction(&ctx, |_ctx, _s| {
                    Box::pin(async { Outcome::Err(Error::Custom("boom".into())) })
                })
                .await;
            match outcome {
                Outcome::Err(e) => {
                    assert_eq!(e.transaction_kind(), Some(TransactionErrorKind::RollbackFailed));
                    let source = std::error::Error::source(&e).expect("source");
                    assert_eq!(source.to_string(), "boom");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        });
    }

    #[test]
    fn panic_rolls_back_and_resumes() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let (db, mut session) = fixture();
        rt.block_on(async {
            let ctx = OrmContext::new(&cx);
            let caught = AssertUnwindSafe(session.transaction(&ctx, |_ctx, _s| {
                Box::pin(async { faulty_body() })
            }))
            .catch_unwind()
            .await;
            let payload = caught.expect_err("panic must propagate");
            assert_eq!(
                payload.downcast_ref::<&str>().copied(),
                Some("fault in transaction body")
            );
            assert_eq!(db.count(EventKind::Rollback), 1);
            assert_eq!(db.count(EventKind::Commit), 0);
        });
    }
}
