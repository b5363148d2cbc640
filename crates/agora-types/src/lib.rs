//! Core types for the Agora exchange protocol.
//!
//! This crate defines the records exchanged with the directory service and the
//! exchange server, plus the configuration structs shared by the node engine and
//! the CLI. It contains no I/O and no business logic.

pub mod config;
pub mod exchange;
pub mod node;

/// Identifier type used for every correlated protocol message.
pub type IdType = u64;

/// Protocol base version reported to the directory service at registration.
pub const PROTOCOL_BASE_VERSION: &str = "0.6.0";
