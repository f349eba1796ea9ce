//! Named storages and primary/replica routing for rowbind.
//!
//! A [`Storage`] is a named database target: a connection [`Route`], the
//! placeholder style its statements render with, and the schema mapper
//! shared by every session bound to it. A route is either a single
//! connection source or a [`ReplicaSet`] that sends writes and forced reads
//! to the primary and spreads plain reads over the replicas.

pub mod config;
pub mod replica;

pub use config::{ReplicatedStorageConfig, SimpleStorageConfig, StorageConfig};
pub use replica::{ReplicaSet, ReplicaStrategy};

use rowbind_core::SchemaMapper;
use rowbind_query::PlaceholderStyle;
use std::fmt;
use std::sync::Arc;

/// The operation a session is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SqlAction {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

impl SqlAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SqlAction::Select => "select",
            SqlAction::Insert => "insert",
            SqlAction::Update => "update",
            SqlAction::Delete => "delete",
        }
    }

    pub const fn is_read(&self) -> bool {
        matches!(self, SqlAction::Select)
    }
}

impl fmt::Display for SqlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the router needs to know about the calling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteHint {
    pub action: SqlAction,
    pub force_primary: bool,
}

impl RouteHint {
    pub const fn new(action: SqlAction, force_primary: bool) -> Self {
        Self {
            action,
            force_primary,
        }
    }
}

/// Where a storage's connections come from.
pub enum Route<C> {
    /// One connection source for everything.
    Simple(Arc<C>),
    /// A primary plus read replicas.
    Replicated(ReplicaSet<C>),
}

impl<C> Route<C> {
    pub fn simple(conn: C) -> Self {
        Route::Simple(Arc::new(conn))
    }

    /// Pick the connection source for an operation.
    pub fn select(&self, hint: RouteHint) -> &Arc<C> {
        match self {
            Route::Simple(conn) => conn,
            Route::Replicated(set) => set.select(hint),
        }
    }

    /// The source writes go to.
    pub fn primary(&self) -> &Arc<C> {
        match self {
            Route::Simple(conn) => conn,
            Route::Replicated(set) => set.primary(),
        }
    }
}

impl<C> fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Simple(_) => f.write_str("Route::Simple"),
            Route::Replicated(set) => f.debug_tuple("Route::Replicated").field(set).finish(),
        }
    }
}

/// A named database target.
pub struct Storage<C> {
    name: String,
    placeholder: PlaceholderStyle,
    mapper: Arc<SchemaMapper>,
    route: Route<C>,
}

impl<C> Storage<C> {
    /// Build a storage from its configuration and route. The schema mapper
    /// is created here, keyed by the storage name and configured naming.
    pub fn new(config: &StorageConfig, route: Route<C>) -> Self {
        let mapper = SchemaMapper::with_naming(config.name.clone(), config.naming.naming_fn());
        Self {
            name: config.name.clone(),
            placeholder: config.placeholder,
            mapper: Arc::new(mapper),
            route,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placeholder(&self) -> PlaceholderStyle {
        self.placeholder
    }

    pub fn mapper(&self) -> &Arc<SchemaMapper> {
        &self.mapper
    }

    pub fn route(&self) -> &Route<C> {
        &self.route
    }

    /// Pick the connection source for an operation.
    pub fn select(&self, hint: RouteHint) -> &Arc<C> {
        let conn = self.route.select(hint);
        tracing::trace!(
            storage = %self.name,
            action = %hint.action,
            force_primary = hint.force_primary,
            "routed connection"
        );
        conn
    }
}

impl<C> fmt::Debug for Storage<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("placeholder", &self.placeholder)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
