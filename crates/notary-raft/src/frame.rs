//! Length-prefixed JSON framing over byte streams.
//!
//! Each frame is a big-endian `u32` body length followed by the JSON body.
//! Shared by the Raft transport and the notary session protocol.

use std::io::ErrorKind;

use notary_types::{NotaryError, Result, constants::MAX_FRAME_BYTES};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode `value` and write it as one frame.
///
/// A value too large to frame is a [`NotaryError::MalformedRequest`]; every
/// other failure is a [`NotaryError::Transport`].
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|_| body.len() <= MAX_FRAME_BYTES)
        .ok_or_else(|| NotaryError::MalformedRequest {
            reason: format!("frame of {} bytes exceeds limit of {MAX_FRAME_BYTES}", body.len()),
        })?;
    writer.write_all(&len.to_be_bytes()).await.map_err(transport)?;
    writer.write_all(&body).await.map_err(transport)?;
    writer.flush().await.map_err(transport)?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before a header.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let Some(body) = read_frame_bytes(reader).await? else {
        return Ok(None);
    };
    decode_frame(&body).map(Some)
}

/// Read one frame body without decoding it.
///
/// A stream that ends inside a frame yields [`NotaryError::SessionClosed`];
/// resets and other read failures yield [`NotaryError::Transport`].
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(transport(e)),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NotaryError::Transport {
            reason: format!("incoming frame of {len} bytes exceeds limit of {MAX_FRAME_BYTES}"),
        });
    }
    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Some(body)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(NotaryError::SessionClosed),
        Err(e) => Err(transport(e)),
    }
}

/// Decode a frame body read with [`read_frame_bytes`].
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| NotaryError::MalformedRequest {
        reason: format!("undecodable frame: {e}"),
    })
}

fn transport(err: std::io::Error) -> NotaryError {
    NotaryError::Transport { reason: err.to_string() }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    #[tokio::test]
    async fn frames_are_delimited() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &Ping { seq: 1 }).await.unwrap();
        write_frame(&mut a, &Ping { seq: 2 }).await.unwrap();
        drop(a);

        assert_eq!(read_frame::<_, Ping>(&mut b).await.unwrap(), Some(Ping { seq: 1 }));
        assert_eq!(read_frame::<_, Ping>(&mut b).await.unwrap(), Some(Ping { seq: 2 }));
        assert_eq!(read_frame::<_, Ping>(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = u32::try_from(MAX_FRAME_BYTES + 1).unwrap();
        a.write_all(&len.to_be_bytes()).await.unwrap();
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, NotaryError::Transport { .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{{{").await.unwrap();
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, NotaryError::MalformedRequest { .. }));
    }

    #[tokio::test]
    async fn stream_ending_inside_a_frame_is_a_closed_session() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&24u32.to_be_bytes()).await.unwrap();
        a.write_all(br#"{"seq":"#).await.unwrap();
        drop(a);
        let err = read_frame::<_, Ping>(&mut b).await.unwrap_err();
        assert!(matches!(err, NotaryError::SessionClosed));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn oversized_outgoing_frame_is_malformed() {
        let (mut a, _b) = tokio::io::duplex(64);
        let huge = "x".repeat(MAX_FRAME_BYTES);
        let err = write_frame(&mut a, &huge).await.unwrap_err();
        assert!(matches!(err, NotaryError::MalformedRequest { .. }));
        assert!(!err.is_retryable());
    }
}
