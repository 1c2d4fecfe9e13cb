use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the big-endian u32 sequence number that starts every packet
pub const SEQUENCE_LEN: usize = size_of::<u32>();

/// A request or an acknowledgment. Acknowledgments echo the request's sequence number and carry
///  no payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DatagramPacket {
    pub sequence: u32,
    pub payload: Bytes,
}

impl DatagramPacket {
    pub fn is_ack(&self) -> bool {
        self.payload.is_empty()
    }
}

pub fn encode_request(sequence: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQUENCE_LEN + payload.len());
    buf.put_u32(sequence);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn encode_ack(sequence: u32) -> Bytes {
    Bytes::copy_from_slice(&sequence.to_be_bytes())
}

pub fn decode(mut buf: &[u8]) -> Result<DatagramPacket, ProtocolError> {
    if buf.len() < SEQUENCE_LEN {
        return Err(ProtocolError::PacketTooShort(buf.len()));
    }

    let sequence = buf.get_u32();
    Ok(DatagramPacket {
        sequence,
        payload: Bytes::copy_from_slice(buf),
    })
}
