//! Client-side protocol engine for the Agora demand/supply exchange network.
//!
//! - [`session::NodeSession`] registers a node with the directory service and
//!   keeps the registration alive from a background task.
//! - [`negotiation::NegotiationClient`] advertises, proposes, selects and
//!   confirms demand and supply on one channel type, and owns the message bus
//!   opened by a successful match.
//! - [`idgen::IdGenerator`] issues the time-ordered ids every record carries.

pub mod backoff;
pub mod config;
pub mod error;
pub mod idgen;
pub mod load;
pub mod mbus;
pub mod negotiation;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use error::{NodeError, NodeResult};
pub use negotiation::NegotiationClient;
pub use session::{NodeSession, SessionPhase};
