//! Time-ordered 64-bit id generator.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | 41 bits: ms since 2020-01-01T00:00:00Z | 10 bits: node number | 12 bits: sequence |
//! ```
//!
//! The generator is seeded with the node number assigned at registration and
//! can be reseeded at any time. Its clock and sequence are never reset, so ids
//! issued after a reseed cannot collide with earlier ones.

use crate::error::{NodeError, NodeResult};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;
use tracing::{debug, warn};

/// 2020-01-01T00:00:00Z in Unix milliseconds.
pub const ID_EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

/// Largest node number that fits in an id.
pub const MAX_NODE_NUMBER: i64 = (1 << NODE_BITS) - 1;

const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

#[derive(Debug, Default)]
struct GenState {
    node: Option<u64>,
    last_ms: u64,
    sequence: u64,
}

/// Thread-safe id generator shared by a session and its channels.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<GenState>,
}

impl IdGenerator {
    /// A generator that refuses to issue ids until it is seeded.
    pub fn unseeded() -> Self {
        Self::default()
    }

    /// A generator seeded with `node_number`.
    pub fn new(node_number: i64) -> NodeResult<Self> {
        let node = validate(node_number)?;
        Ok(Self {
            state: Mutex::new(GenState {
                node: Some(node),
                ..Default::default()
            }),
        })
    }

    /// Reseed with a new node number, effective for subsequent calls.
    ///
    /// An invalid node number leaves the previous seed in place; the failure
    /// is logged and `false` is returned.
    pub fn reinitialize(&self, node_number: i64) -> bool {
        let node = match validate(node_number) {
            Ok(node) => node,
            Err(e) => {
                warn!(node_number, error = %e, "Id generator reseed failed, keeping previous seed");
                return false;
            }
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.node = Some(node);
        debug!(node_number, "Id generator seeded");
        true
    }

    /// Drop the seed. Ids are refused until the next reseed; the clock and
    /// sequence are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.node.take().is_some() {
            debug!("Id generator unseeded");
        }
    }

    /// The node number currently embedded in new ids.
    pub fn node_number(&self) -> Option<u16> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.node.map(|n| n as u16)
    }

    /// Issue a new id. Fails with [`NodeError::NotRegistered`] before the first seed.
    pub fn generate(&self) -> NodeResult<u64> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let node = state.node.ok_or(NodeError::NotRegistered)?;

        let now = current_ms();
        if now > state.last_ms {
            state.last_ms = now;
            state.sequence = 0;
        } else if state.sequence < MAX_SEQUENCE {
            state.sequence += 1;
        } else {
            // Sequence exhausted: borrow the next millisecond.
            state.last_ms += 1;
            state.sequence = 0;
        }

        Ok(((state.last_ms & TIMESTAMP_MASK) << (NODE_BITS + SEQUENCE_BITS))
            | (node << SEQUENCE_BITS)
            | state.sequence)
    }
}

fn validate(node_number: i64) -> NodeResult<u64> {
    if (0..=MAX_NODE_NUMBER).contains(&node_number) {
        Ok(node_number as u64)
    } else {
        Err(NodeError::InvalidNodeNumber(node_number))
    }
}

fn current_ms() -> u64 {
    (Utc::now().timestamp_millis().max(0) as u64).saturating_sub(ID_EPOCH_MS)
}

/// Node number embedded in `id`.
pub fn node_of(id: u64) -> u16 {
    ((id >> SEQUENCE_BITS) & MAX_NODE_NUMBER as u64) as u16
}

/// Creation time embedded in `id`.
pub fn timestamp_of(id: u64) -> Option<DateTime<Utc>> {
    let ms = (id >> (NODE_BITS + SEQUENCE_BITS)) + ID_EPOCH_MS;
    Utc.timestamp_millis_opt(ms as i64).single()
}
