//! Sessions, hooks and nested transactions for rowbind.
//!
//! A [`Session`] runs one logical operation (or a chain of them) against a
//! named storage. Each typed operation fills its statement from the record's
//! column metadata, runs the matching before-hooks, executes against the
//! session's transaction or a routed connection, and always runs the
//! after-hooks.
//!
//! Write operations get their transaction from the built-in hooks: the
//! before-hook begins or joins a transaction and the after-hook commits or
//! rolls it back. Joins are counted on a shared [`TxScope`], so only the
//! outermost scope reaches the database.
//!
//! # Example
//!
//! ```ignore
//! let orm = Orm::new();
//! let config = SimpleStorageConfig::new(
//!     StorageConfig::new("main").default_storage(true),
//!     ConnectionConfig::new("mem://app"),
//! );
//! orm.register_simple(&cx, &config).await;
//!
//! let ctx = OrmContext::new(&cx);
//! let mut session = orm.session()?;
//! let outcome = session
//!     .transaction(&ctx, |ctx, s| Box::pin(async move {
//!         match s.insert(ctx, &user).await {
//!             Outcome::Ok(_) => s.update_by_model(ctx, &account).await.map(|_| ()),
//!             other => other.map(|_| ()),
//!         }
//!     }))
//!     .await;
//! ```

pub mod context;
pub mod hooks;
pub mod orm;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tx;

pub use context::OrmContext;
pub use hooks::{BeginTxHook, EndTxHook, Hook, HookEvent, HookFuture, HookRegistry, SelectJoinHook};
pub use orm::Orm;
pub use session::Session;
pub use tx::TxScope;
