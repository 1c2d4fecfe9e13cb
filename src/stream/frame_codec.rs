use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Size of the big-endian u32 that precedes every frame's payload
pub const LENGTH_PREFIX_LEN: usize = size_of::<u32>();

/// Serialize a message to JSON and wrap it in a frame, i.e. prepend the payload's length
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Append a complete frame for `message` to `buf`. If encoding fails, `buf` is left as it was.
pub fn encode_into<T: Serialize + ?Sized>(message: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let start = buf.len();

    // the length is patched in after serializing, saving an intermediate buffer
    buf.put_u32(0);
    if let Err(e) = serde_json::to_writer((&mut *buf).writer(), message) {
        buf.truncate(start);
        return Err(ProtocolError::Encoding(e.to_string()));
    }

    let payload_len = match checked_payload_len(buf.len() - start - LENGTH_PREFIX_LEN) {
        Ok(len) => len,
        Err(e) => {
            buf.truncate(start);
            return Err(e);
        }
    };
    buf[start..start + LENGTH_PREFIX_LEN].copy_from_slice(&payload_len.to_be_bytes());
    Ok(())
}

fn checked_payload_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len)
        .map_err(|_| ProtocolError::Encoding(format!("payload of {} bytes does not fit a u32 length prefix", len)))
}

/// Try to decode the first frame in `buf`, which accumulates bytes as they arrive from a stream.
///
/// Returns the message and the number of bytes it occupied (prefix included) once the frame is
///  complete, and `(None, 0)` while it is not. The payload is not looked at before all of it
///  is present.
pub fn decode_incremental<T: DeserializeOwned>(buf: &[u8]) -> Result<(Option<T>, usize), ProtocolError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok((None, 0));
    }

    let payload_len = (&buf[..LENGTH_PREFIX_LEN]).get_u32() as usize;
    let frame_len = match LENGTH_PREFIX_LEN.checked_add(payload_len) {
        Some(frame_len) if buf.len() >= frame_len => frame_len,
        // a frame longer than the address space can never be complete
        _ => return Ok((None, 0)),
    };

    let message = serde_json::from_slice(&buf[LENGTH_PREFIX_LEN..frame_len])?;
    Ok((Some(message), frame_len))
}

/// Accumulates bytes read from a stream and hands out complete messages, removing the bytes
///  of each decoded frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> FrameBuffer {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> FrameBuffer {
        FrameBuffer {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// The underlying buffer, for reading from a stream directly into it
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes that are not yet part of a decoded message
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn next_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        let (message, consumed) = decode_incremental(&self.buf)?;
        self.buf.advance(consumed);
        Ok(message)
    }
}
