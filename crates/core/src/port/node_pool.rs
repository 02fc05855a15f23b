// Node Pool Port (Interface)

use std::collections::HashSet;
use std::time::Duration;

use crate::error::Result;
use async_trait::async_trait;

/// An allocated test machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub id: i64,
    pub ip: String,
}

/// Interface to the external node inventory.
///
/// The inventory owns the allocation state (READY/HOLD); the orchestrator
/// only ever flips READY->HOLD on allocate and deletes the hold on release,
/// never infers state.
#[async_trait]
pub trait NodePool: Send + Sync {
    /// Allocate the first READY node carrying the label. `Ok(None)` means
    /// the pool is exhausted - back-pressure, not failure.
    async fn allocate(&self, label: &str) -> Result<Option<NodeHandle>>;

    /// Ids of nodes held for longer than `min_state_age`. The age floor
    /// avoids racing a node that was just allocated but whose owning job
    /// row has not been committed yet.
    async fn held_nodes(&self, min_state_age: Duration) -> Result<HashSet<i64>>;

    /// Release a hold back to the inventory. A no-op (not an error) for
    /// id 0, so callers may call it unconditionally.
    async fn release(&self, node_id: i64) -> Result<()>;
}
