//! Lifecycle hooks.
//!
//! A [`HookRegistry`] maps each [`HookEvent`] to an ordered list of hooks.
//! Hooks report failure by latching an error on the session; dispatch stops
//! at the first hook that does so and leaves the error for the caller.
//!
//! The built-in hooks installed by
//! [`HookRegistry::with_transaction_hooks`] give writes their transaction:
//!
//! | event | hook |
//! |---|---|
//! | `BeforeSelect` | [`SelectJoinHook`] |
//! | `BeforeInsert`, `BeforeUpdate`, `BeforeDelete` | [`BeginTxHook`] |
//! | `AfterInsert`, `AfterUpdate`, `AfterDelete` | [`EndTxHook`] |

use crate::context::OrmContext;
use crate::session::Session;
use asupersync::Outcome;
use rowbind_core::{Connection, Error};
use rowbind_pool::SqlAction;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Point in an operation's lifecycle where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeSelect,
    AfterSelect,
    BeforeDelete,
    AfterDelete,
}

impl HookEvent {
    pub const ALL: [HookEvent; 8] = [
        HookEvent::BeforeInsert,
        HookEvent::AfterInsert,
        HookEvent::BeforeUpdate,
        HookEvent::AfterUpdate,
        HookEvent::BeforeSelect,
        HookEvent::AfterSelect,
        HookEvent::BeforeDelete,
        HookEvent::AfterDelete,
    ];

    pub const fn before(action: SqlAction) -> Self {
        match action {
            SqlAction::Select => HookEvent::BeforeSelect,
            SqlAction::Insert => HookEvent::BeforeInsert,
            SqlAction::Update => HookEvent::BeforeUpdate,
            SqlAction::Delete => HookEvent::BeforeDelete,
        }
    }

    pub const fn after(action: SqlAction) -> Self {
        match action {
            SqlAction::Select => HookEvent::AfterSelect,
            SqlAction::Insert => HookEvent::AfterInsert,
            SqlAction::Update => HookEvent::AfterUpdate,
            SqlAction::Delete => HookEvent::AfterDelete,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeInsert => "before_insert",
            HookEvent::AfterInsert => "after_insert",
            HookEvent::BeforeUpdate => "before_update",
            HookEvent::AfterUpdate => "after_update",
            HookEvent::BeforeSelect => "before_select",
            HookEvent::AfterSelect => "after_select",
            HookEvent::BeforeDelete => "before_delete",
            HookEvent::AfterDelete => "after_delete",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Future returned by [`Hook::call`].
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A callback run at a lifecycle point.
///
/// Hooks signal failure with [`Session::set_error`].
pub trait Hook<C: Connection>: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a OrmContext<'a, C>, session: &'a mut Session<C>) -> HookFuture<'a>;
}

struct FnHook<F>(F);

impl<C, F> Hook<C> for FnHook<F>
where
    C: Connection,
    F: Fn(&OrmContext<'_, C>, &mut Session<C>) + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a OrmContext<'a, C>, session: &'a mut Session<C>) -> HookFuture<'a> {
        (self.0)(ctx, session);
        Box::pin(std::future::ready(()))
    }
}

type HookList<C> = Vec<Arc<dyn Hook<C>>>;

/// Hooks by event, in registration order.
pub struct HookRegistry<C: Connection> {
    hooks: RwLock<HashMap<HookEvent, HookList<C>>>,
}

impl<C: Connection> Default for HookRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> HookRegistry<C> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in transaction hooks installed.
    pub fn with_transaction_hooks() -> Self {
        let registry = Self::new();
        registry.register(HookEvent::BeforeSelect, SelectJoinHook);
        for action in [SqlAction::Insert, SqlAction::Update, SqlAction::Delete] {
            registry.register(HookEvent::before(action), BeginTxHook);
            registry.register(HookEvent::after(action), EndTxHook);
        }
        registry
    }

    /// Append a hook for `event`. Hooks are not deduplicated.
    pub fn register(&self, event: HookEvent, hook: impl Hook<C>) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        hooks.entry(event).or_default().push(Arc::new(hook));
        tracing::debug!(event = %event, "registered hook");
    }

    /// Append a synchronous callback for `event`.
    pub fn register_fn<F>(&self, event: HookEvent, f: F)
    where
        F: Fn(&OrmContext<'_, C>, &mut Session<C>) + Send + Sync + 'static,
    {
        self.register(event, FnHook(f));
    }

    /// Number of hooks registered for `event`.
    pub fn len(&self, event: HookEvent) -> usize {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks.get(&event).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks.values().all(Vec::is_empty)
    }

    fn snapshot(&self, event: HookEvent) -> HookList<C> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks.get(&event).cloned().unwrap_or_default()
    }

    /// Run the hooks for `event` in registration order.
    ///
    /// Stops as soon as a hook latches an error on the session. An error
    /// already latched before dispatch does not stop it, so after-hooks
    /// still run for a failed operation.
    pub async fn dispatch(&self, ctx: &OrmContext<'_, C>, event: HookEvent, session: &mut Session<C>) {
        let failed_before = session.error().is_some();
        for hook in self.snapshot(event) {
            hook.call(ctx, session).await;
            if !failed_before && session.error().is_some() {
                tracing::debug!(event = %event, "hook failed; skipping remaining hooks");
                break;
            }
        }
    }
}

impl<C: Connection> fmt::Debug for HookRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<HookEvent, usize> = hooks.iter().map(|(e, v)| (*e, v.len())).collect();
        f.debug_struct("HookRegistry").field("hooks", &counts).finish()
    }
}

/// Latch a failed outcome on the session. A panicked outcome is re-raised.
fn latch(session: &mut Session<impl Connection>, outcome: Outcome<(), Error>) {
    match outcome {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => session.set_error(e),
        Outcome::Cancelled(_) => session.set_error(Error::Cancelled),
        Outcome::Panicked(p) => panic!("transaction hook panicked: {p:?}"),
    }
}

/// Makes a read join the ambient transaction of its storage.
///
/// The session is grafted onto the scope without taking a hold, so the
/// read runs inside the transaction on the primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectJoinHook;

impl<C: Connection> Hook<C> for SelectJoinHook {
    fn call<'a>(&'a self, ctx: &'a OrmContext<'a, C>, session: &'a mut Session<C>) -> HookFuture<'a> {
        if session.scope().is_none_or(|scope| scope.is_finished()) {
            if let Some(scope) = ctx.scope_for(session.storage_name()) {
                session.graft(Arc::clone(scope));
            }
        }
        Box::pin(std::future::ready(()))
    }
}

/// Begins or joins the transaction a write runs in.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeginTxHook;

impl<C: Connection> Hook<C> for BeginTxHook {
    fn call<'a>(&'a self, ctx: &'a OrmContext<'a, C>, session: &'a mut Session<C>) -> HookFuture<'a> {
        Box::pin(async move {
            let outcome = session.begin_tx(ctx).await;
            latch(session, outcome);
        })
    }
}

/// Commits the write's transaction, or rolls it back if the write failed.
///
/// A failed commit is latched on the session. A failed rollback is logged;
/// the session keeps the error that caused it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndTxHook;

impl<C: Connection> Hook<C> for EndTxHook {
    fn call<'a>(&'a self, ctx: &'a OrmContext<'a, C>, session: &'a mut Session<C>) -> HookFuture<'a> {
        Box::pin(async move {
            if session.scope().is_none() {
                return;
            }
            if session.error().is_some() {
                match session.rollback(ctx.cx()).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => tracing::error!(error = %e, "rollback after failed write failed"),
                    Outcome::Cancelled(_) => tracing::error!("rollback after failed write was cancelled"),
                    Outcome::Panicked(p) => panic!("rollback after failed write panicked: {p:?}"),
                }
            } else {
                let outcome = session.commit(ctx.cx()).await;
                latch(session, outcome);
            }
        })
    }
}
