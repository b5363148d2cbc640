//! Framed reads and writes over any async byte stream.

use crate::message::{decode_length, decode_message, encode_message, WireMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("Unexpected response to {0}")]
    UnexpectedResponse(String),
}

impl WireError {
    /// Build a service-side error that is reported to the caller as-is.
    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Code used when this error is sent back over the wire.
    pub fn code(&self) -> i32 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::Json(_) => 400,
            _ => 500,
        }
    }
}

/// Write a framed message (4-byte length + JSON).
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON).
///
/// A peer closing the socket between frames is reported as
/// [`WireError::ConnectionClosed`].
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{WireMessageKind, WireRequest};

    #[tokio::test]
    async fn test_write_then_read_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = WireMessage {
            id: 11,
            kind: WireMessageKind::Request(WireRequest::QueryNode { node_id: 3 }),
        };
        write_message(&mut client, &msg).await.unwrap();
        let got = read_message(&mut server).await.unwrap();
        assert_eq!(got.id, 11);
        assert!(matches!(
            got.kind,
            WireMessageKind::Request(WireRequest::QueryNode { node_id: 3 })
        ));
    }

    #[tokio::test]
    async fn test_closed_peer_is_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_MESSAGE_SIZE + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_frame_layout_on_the_wire() {
        let msg = WireMessage {
            id: 5,
            kind: WireMessageKind::Request(WireRequest::QueryNode { node_id: 9 }),
        };
        let expected = encode_message(&msg).unwrap();
        let mut writer = tokio_test::io::Builder::new().write(&expected).build();
        write_message(&mut writer, &msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let msg = WireMessage {
            id: 5,
            kind: WireMessageKind::Request(WireRequest::QueryNode { node_id: 9 }),
        };
        let bytes = encode_message(&msg).unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..4])
            .read(&bytes[4..8])
            .build();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[tokio::test]
    async fn test_reset_mid_header_is_io_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WireError::remote(404, "missing").code(), 404);
        assert_eq!(WireError::ConnectionClosed.code(), 500);
    }
}
