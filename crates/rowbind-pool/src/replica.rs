//! Primary/replica connection sets.

use crate::RouteHint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Strategy for selecting which replica serves a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStrategy {
    /// Rotate through replicas in order, starting from the first.
    #[default]
    RoundRobin,
    /// Spread reads pseudo-randomly.
    Random,
}

/// One primary plus an ordered list of read replicas.
///
/// Writes, forced reads, and every read when no replica is configured go
/// to the primary. Replica selection is lock-free.
pub struct ReplicaSet<C> {
    primary: Arc<C>,
    replicas: Vec<Arc<C>>,
    strategy: ReplicaStrategy,
    counter: AtomicUsize,
}

impl<C> ReplicaSet<C> {
    pub fn new(primary: C, replicas: Vec<C>) -> Self {
        Self::with_strategy(primary, replicas, ReplicaStrategy::RoundRobin)
    }

    pub fn with_strategy(primary: C, replicas: Vec<C>, strategy: ReplicaStrategy) -> Self {
        Self {
            primary: Arc::new(primary),
            replicas: replicas.into_iter().map(Arc::new).collect(),
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    /// The connection source every write goes to.
    pub fn primary(&self) -> &Arc<C> {
        &self.primary
    }

    /// Read replicas in configuration order.
    pub fn replicas(&self) -> &[Arc<C>] {
        &self.replicas
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// How reads are spread over the replicas.
    pub fn strategy(&self) -> ReplicaStrategy {
        self.strategy
    }

    /// Pick the connection source for an operation.
    pub fn select(&self, hint: RouteHint) -> &Arc<C> {
        if hint.force_primary || !hint.action.is_read() || self.replicas.is_empty() {
            return &self.primary;
        }
        &self.replicas[self.next_replica()]
    }

    fn next_replica(&self) -> usize {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        match self.strategy {
            ReplicaStrategy::RoundRobin => seq % self.replicas.len(),
            // Knuth multiplicative hash over the sequence number
            ReplicaStrategy::Random => seq.wrapping_mul(2_654_435_761) % self.replicas.len(),
        }
    }
}

impl<C> fmt::Debug for ReplicaSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaSet")
            .field("replicas", &self.replicas.len())
            .field("strategy", &self.strategy)
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
