//! The runtime registry of storages and hooks.

use crate::hooks::HookRegistry;
use crate::session::Session;
use asupersync::{Cx, Outcome};
use rowbind_core::{Connect, Connection, Error, Result};
use rowbind_pool::{ReplicaSet, ReplicatedStorageConfig, Route, SimpleStorageConfig, Storage, StorageConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
struct Registry<C> {
    storages: HashMap<String, Arc<Storage<C>>>,
    default: Option<String>,
}

/// Storages by name plus the hooks every session runs.
///
/// Built once at startup and shared (usually behind an `Arc`) by everything
/// that opens sessions.
pub struct Orm<C: Connection> {
    registry: RwLock<Registry<C>>,
    hooks: Arc<HookRegistry<C>>,
}

impl<C: Connection> Default for Orm<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Orm<C> {
    /// A runtime with the built-in transaction hooks.
    pub fn new() -> Self {
        Self::with_hooks(HookRegistry::with_transaction_hooks())
    }

    /// A runtime with a caller-built hook registry.
    pub fn with_hooks(hooks: HookRegistry<C>) -> Self {
        Self {
            registry: RwLock::new(Registry {
                storages: HashMap::new(),
                default: None,
            }),
            hooks: Arc::new(hooks),
        }
    }

    pub fn hooks(&self) -> &Arc<HookRegistry<C>> {
        &self.hooks
    }

    /// Register a storage under `config.name`.
    ///
    /// The first storage registered, or one whose config sets `default`,
    /// becomes the default. Names must be unique.
    pub fn register(&self, config: &StorageConfig, route: Route<C>) -> Result<Arc<Storage<C>>> {
        config.validate()?;
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.storages.contains_key(&config.name) {
            return Err(Error::config(format!(
                "storage `{}` is already registered",
                config.name
            )));
        }

        let storage = Arc::new(Storage::new(config, route));
        registry
            .storages
            .insert(config.name.clone(), Arc::clone(&storage));
        if config.default || registry.default.is_none() {
            registry.default = Some(config.name.clone());
        }
        tracing::info!(
            storage = %config.name,
            default = registry.default.as_deref() == Some(config.name.as_str()),
            "registered storage"
        );
        Ok(storage)
    }

    /// Connect and register a single-connection storage.
    pub async fn register_simple(
        &self,
        cx: &Cx,
        config: &SimpleStorageConfig,
    ) -> Outcome<Arc<Storage<C>>, Error>
    where
        C: Connect,
    {
        if let Err(e) = config.storage.validate() {
            return Outcome::Err(e);
        }
        let conn = match C::connect(cx, &config.connection).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match self.register(&config.storage, Route::simple(conn)) {
            Ok(storage) => Outcome::Ok(storage),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Connect the primary and every replica, then register the storage.
    pub async fn register_replicated(
        &self,
        cx: &Cx,
        config: &ReplicatedStorageConfig,
    ) -> Outcome<Arc<Storage<C>>, Error>
    where
        C: Connect,
    {
        if let Err(e) = config.storage.validate() {
            return Outcome::Err(e);
        }
        let primary = match C::connect(cx, &config.primary).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut replicas = Vec::with_capacity(config.replicas.len());
        for replica in &config.replicas {
            match C::connect(cx, replica).await {
                Outcome::Ok(conn) => replicas.push(conn),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        let route = Route::Replicated(ReplicaSet::with_strategy(primary, replicas, config.strategy));
        match self.register(&config.storage, route) {
            Ok(storage) => Outcome::Ok(storage),
            Err(e) => Outcome::Err(e),
        }
    }

    pub fn storage(&self, name: &str) -> Result<Arc<Storage<C>>> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .storages
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown storage `{name}`")))
    }

    pub fn default_storage_name(&self) -> Option<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.default.clone()
    }

    pub fn storage_names(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = registry.storages.keys().cloned().collect();
        names.sort();
        names
    }

    /// A session on the default storage.
    pub fn session(&self) -> Result<Session<C>> {
        let name = self
            .default_storage_name()
            .ok_or_else(|| Error::config("no storage registered"))?;
        self.session_for(&name)
    }

    /// A session on the named storage.
    pub fn session_for(&self, name: &str) -> Result<Session<C>> {
        let storage = self.storage(name)?;
        Ok(Session::new(storage, Arc::clone(&self.hooks)))
    }
}

impl<C: Connection> fmt::Debug for Orm<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orm")
            .field("storages", &self.storage_names())
            .field("default", &self.default_storage_name())
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConnection, MemoryDatabase};
    use asupersync::runtime::RuntimeBuilder;
    use rowbind_core::ConnectionConfig;
    use rowbind_pool::ReplicaStrategy;

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    #[test]
    fn first_storage_is_default() {
        let db = MemoryDatabase::new();
        let orm = Orm::<MemoryConnection>::new();
        orm.register(&StorageConfig::new("a"), Route::simple(db.connection("a")))
            .unwrap();
        orm.register(&StorageConfig::new("b"), Route::simple(db.connection("b")))
            .unwrap();
        assert_eq!(orm.default_storage_name().as_deref(), Some("a"));
        assert_eq!(orm.session().unwrap().storage_name(), "a");
        assert_eq!(orm.session_for("b").unwrap().storage_name(), "b");
        assert_eq!(orm.storage_names(), vec!["a", "b"]);
    }

    #[test]
    fn explicit_default_wins() {
        let db = MemoryDatabase::new();
        let orm = Orm::<MemoryConnection>::new();
        orm.register(&StorageConfig::new("a"), Route::simple(db.connection("a")))
            .unwrap();
        orm.register(
            &StorageConfig::new("b").default_storage(true),
            Route::simple(db.connection("b")),
        )
        .unwrap();
        assert_eq!(orm.default_storage_name().as_deref(), Some("b"));
    }

    #[test]
    fn duplicate_and_unknown_names_are_config_errors() {
        let db = MemoryDatabase::new();
        let orm = Orm::<MemoryConnection>::new();
        orm.register(&StorageConfig::new("a"), Route::simple(db.connection("a")))
            .unwrap();
        let dup = orm
            .register(&StorageConfig::new("a"), Route::simple(db.connection("a")))
            .unwrap_err();
        assert!(matches!(dup, Error::Config(_)));
        assert!(matches!(orm.session_for("missing"), Err(Error::Config(_))));
        assert!(matches!(Orm::<MemoryConnection>::new().session(), Err(Error::Config(_))));
    }

    #[test]
    fn register_from_configs() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let orm = Orm::<MemoryConnection>::new();
        rt.block_on(async {
            unwrap_outcome(
                orm.register_simple(
                    &cx,
                    &SimpleStorageConfig::new(
                        StorageConfig::new("simple"),
                        ConnectionConfig::new("mem://orm-config-test/simple"),
                    ),
                )
                .await,
            );
            let config = ReplicatedStorageConfig::new(
                StorageConfig::new("replicated"),
                ConnectionConfig::new("mem://orm-config-test/primary"),
            )
            .replica(ConnectionConfig::new("mem://orm-config-test/r1"))
            .strategy(ReplicaStrategy::Random);
            let storage = unwrap_outcome(orm.register_replicated(&cx, &config).await);
            match storage.route() {
                Route::Replicated(set) => {
                    assert_eq!(set.replica_count(), 1);
                    assert_eq!(set.strategy(), ReplicaStrategy::Random);
                }
                Route::Simple(_) => panic!("expected a replicated route"),
            }

            let bad = SimpleStorageConfig::new(
                StorageConfig::new("bad"),
                ConnectionConfig::new("postgres://nowhere"),
            );
            assert!(matches!(orm.register_simple(&cx, &bad).await, Outcome::Err(Error::Connection(_))));
        });
        assert_eq!(orm.default_storage_name().as_deref(), Some("simple"));
    }
}
