//! Storage configuration.
//!
//! Configs deserialize from JSON and also offer builder-style setters:
//!
//! ```ignore
//! let config = ReplicatedStorageConfig::new(
//!     StorageConfig::new("orders").placeholder(PlaceholderStyle::Dollar),
//!     ConnectionConfig::new("postgres://primary/orders"),
//! )
//! .replica(ConnectionConfig::new("postgres://replica-1/orders"));
//! ```

use crate::replica::ReplicaStrategy;
use rowbind_core::{ConnectionConfig, Error, NamingStrategy, Result};
use rowbind_query::PlaceholderStyle;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(Error::from)
}

/// Settings shared by every kind of storage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name sessions use to find the storage
    pub name: String,
    /// Placeholder syntax of the backing database
    pub placeholder: PlaceholderStyle,
    /// Column naming for records mapped against this storage
    pub naming: NamingStrategy,
    /// Make this the default storage
    pub default: bool,
}

impl StorageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.placeholder = style;
        self
    }

    pub fn naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = naming;
        self
    }

    pub fn default_storage(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        from_json(json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("storage name cannot be empty"));
        }
        Ok(())
    }
}

/// A storage backed by a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleStorageConfig {
    pub storage: StorageConfig,
    pub connection: ConnectionConfig,
}

impl SimpleStorageConfig {
    pub fn new(storage: StorageConfig, connection: ConnectionConfig) -> Self {
        Self {
            storage,
            connection,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        from_json(json)
    }
}

/// A storage backed by a primary and read replicas.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatedStorageConfig {
    pub storage: StorageConfig,
    pub primary: ConnectionConfig,
    pub replicas: Vec<ConnectionConfig>,
    pub strategy: ReplicaStrategy,
}

impl ReplicatedStorageConfig {
    pub fn new(storage: StorageConfig, primary: ConnectionConfig) -> Self {
        Self {
            storage,
            primary,
            ..Default::default()
        }
    }

    pub fn replica(mut self, connection: ConnectionConfig) -> Self {
        self.replicas.push(connection);
        self
    }

    pub fn strategy(mut self, strategy: ReplicaStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        from_json(json)
    }
}
