//! Outstanding proposals of this node.
//!
//! A node with proposals in flight is not in a safe state to move to another
//! exchange server. When the directory asks it to move anyway, the state is
//! locked and incoming records are dropped until the lock is cleared.

use agora_types::exchange::{Demand, Supply};
use agora_types::IdType;
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Proposals {
    supply: Vec<Supply>,
    demand: Vec<Demand>,
    locked: bool,
}

/// Proposal tracking shared by a session and its negotiation clients.
#[derive(Debug, Default)]
pub struct NodeState {
    inner: RwLock<Proposals>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every proposal and release the lock.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = Proposals::default();
    }

    /// True when no proposal is waiting for an answer.
    pub fn is_safe(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.supply.is_empty() && inner.demand.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).locked
    }

    /// Lock the state. Returns `false` if it was already locked.
    pub fn lock(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        !std::mem::replace(&mut inner.locked, true)
    }

    pub fn propose_supply(&self, supply: Supply) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        debug!(supply_id = supply.id, pending = inner.supply.len() + 1, "Tracking proposed supply");
        inner.supply.push(supply);
    }

    pub fn propose_demand(&self, demand: Demand) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        debug!(demand_id = demand.id, pending = inner.demand.len() + 1, "Tracking proposed demand");
        inner.demand.push(demand);
    }

    /// Retire the tracked proposal with `id`, supply or demand.
    pub fn retire(&self, id: IdType) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = inner.supply.iter().position(|s| s.id == id) {
            inner.supply.remove(pos);
            return true;
        }
        if let Some(pos) = inner.demand.iter().position(|d| d.id == id) {
            inner.demand.remove(pos);
            return true;
        }
        warn!(id, "No tracked proposal to retire");
        false
    }

    /// Number of proposals in flight (supplies, demands).
    pub fn pending(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        (inner.supply.len(), inner.demand.len())
    }
}
