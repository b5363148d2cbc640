//! Agora wire transport: directory and exchange calls over framed JSON.
//!
//! Every call travels as a JSON frame over TCP, prefixed with a 4-byte
//! big-endian length header.
//!
//! ## Architecture
//!
//! - **WireMessage**: request, response and stream-item envelopes
//! - **DirectoryService / ExchangeService**: the remote interfaces the node
//!   engine programs against
//! - **TcpDirectoryClient / TcpExchangeClient**: dialing implementations of
//!   those interfaces
//! - **ServiceHost**: serves any implementation of those interfaces on a
//!   TCP listener

pub mod client;
pub mod conn;
pub mod host;
pub mod message;
pub mod service;

pub use client::{TcpDirectoryClient, TcpExchangeClient};
pub use conn::WireError;
pub use host::{HostConfig, ServiceHost};
pub use message::{StreamItem, WireMessage, WireMessageKind, WireRequest, WireResponse};
pub use service::{DirectoryService, ExchangeService, RecordStream};
