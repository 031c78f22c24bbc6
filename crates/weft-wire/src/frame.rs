//! Wire framing: a 4-byte big-endian length header followed by the codec
//! body. The codec itself is an injected capability; the default encodes
//! envelopes as JSON.

use crate::transport::WireError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use weft_types::Envelope;

/// Maximum single frame body (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// The injected serialize/deserialize pair for envelopes.
///
/// The fabric does not define the payload schema; it only needs a way to
/// turn an [`Envelope`] into bytes and back.
pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, WireError>;
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, WireError>;
}

/// Default codec: envelopes as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(envelope).map_err(|e| WireError::Send(format!("serialization: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, WireError> {
        serde_json::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }
}

/// Encode an envelope into a framed byte buffer (length header + body).
pub fn encode_frame(codec: &dyn EnvelopeCodec, envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    let body = codec.encode(envelope)?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(WireError::FrameTooLarge {
            size: body.len() as u32,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Write one framed envelope to a TCP write half.
pub async fn write_frame(
    writer: &mut OwnedWriteHalf,
    codec: &dyn EnvelopeCodec,
    envelope: &Envelope,
) -> Result<(), WireError> {
    let bytes = encode_frame(codec, envelope)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| WireError::Send(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| WireError::Send(e.to_string()))?;
    Ok(())
}

/// Read one framed envelope from a TCP read half.
///
/// A clean EOF maps to [`WireError::Closed`]. A body that fails to decode
/// maps to [`WireError::Decode`] — the stream itself stays in sync, so the
/// caller may keep reading.
pub async fn read_frame(
    reader: &mut OwnedReadHalf,
    codec: &dyn EnvelopeCodec,
) -> Result<Envelope, WireError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::Closed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    codec.decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::Recipient;

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = JsonCodec;
        let env = Envelope::new(
            "n1".into(),
            Recipient::Node("n2".into()),
            b"payload bytes".to_vec(),
        );
        let bytes = codec.encode(&env).unwrap();
        let back = codec.decode(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_frame_layout() {
        let codec = JsonCodec;
        let env = Envelope::new("n1".into(), Recipient::Broadcast, vec![1, 2, 3]);
        let framed = encode_frame(&codec, &env).unwrap();
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]);
        assert_eq!(len as usize, framed.len() - 4);
        let back = codec.decode(&framed[4..]).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = JsonCodec;
        assert!(matches!(
            codec.decode(b"not json at all"),
            Err(WireError::Decode(_))
        ));
    }
}
