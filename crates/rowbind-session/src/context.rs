//! Call-chain context.

use crate::tx::TxScope;
use asupersync::Cx;
use rowbind_core::Connection;
use std::fmt;
use std::sync::Arc;

/// The context every session operation receives.
///
/// Bundles the asupersync [`Cx`] with the transaction scope that is ambient
/// for this call chain, if any. [`Session::transaction`] hands its closure a
/// derived context carrying the scope, so sessions created further down the
/// chain join it instead of opening their own.
///
/// [`Session::transaction`]: crate::Session::transaction
pub struct OrmContext<'a, C: Connection> {
    cx: &'a Cx,
    scope: Option<Arc<TxScope<C>>>,
}

impl<'a, C: Connection> OrmContext<'a, C> {
    /// A context with no ambient transaction.
    pub fn new(cx: &'a Cx) -> Self {
        Self { cx, scope: None }
    }

    /// The capability context driver calls run under.
    pub fn cx(&self) -> &'a Cx {
        self.cx
    }

    /// The ambient transaction scope, finished or not.
    pub fn scope(&self) -> Option<&Arc<TxScope<C>>> {
        self.scope.as_ref()
    }

    /// A derived context carrying `scope`.
    pub fn with_scope(&self, scope: Arc<TxScope<C>>) -> Self {
        Self {
            cx: self.cx,
            scope: Some(scope),
        }
    }

    /// The ambient scope for `storage`, if it is still open.
    pub fn scope_for(&self, storage: &str) -> Option<&Arc<TxScope<C>>> {
        self.scope
            .as_ref()
            .filter(|scope| scope.storage_name() == storage && !scope.is_finished())
    }
}

impl<C: Connection> Clone for OrmContext<'_, C> {
    fn clone(&self) -> Self {
        Self {
            cx: self.cx,
            scope: self.scope.clone(),
        }
    }
}

impl<C: Connection> fmt::Debug for OrmContext<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrmContext")
            .field("scope", &self.scope.as_ref().map(|s| s.storage_name()))
            .finish_non_exhaustive()
    }
}
