//! Node engine error types.

use agora_wire::WireError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Error type for every session, negotiation and bus operation.
#[derive(Error, Debug)]
pub enum NodeError {
    /// A transport or remote-service failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// No identity has been obtained from the directory yet.
    #[error("Node is not registered")]
    NotRegistered,

    /// No message bus is open on this channel.
    #[error("Message bus is not open")]
    BusNotOpen,

    /// Node numbers must fit in 10 bits.
    #[error("Invalid node number {0} (must be 0..=1023)")]
    InvalidNodeNumber(i64),

    /// A remote call did not complete in time.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// The service answered but declined the request.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Configuration could not be used.
    #[error("Config error: {0}")]
    Config(String),
}

/// Alias for node engine results.
pub type NodeResult<T> = Result<T, NodeError>;

/// Run a remote call, bounded by `limit`.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> NodeResult<T>
where
    F: Future<Output = Result<T, WireError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(NodeError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}
