use std::io;

/// Everything that can go wrong in the framing and acknowledgment protocols.
///
/// None of these is fatal to a process: decoding errors end a single connection (stream) or
///  discard a single packet (datagram), and a [ProtocolError::DeliveryFailure] is the regular
///  outcome of a reliable send that ran out of attempts.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message can not be encoded: {0}")]
    Encoding(String),

    #[error("malformed frame payload: {0}")]
    Decoding(#[from] serde_json::Error),

    #[error("datagram of {0} bytes is too short to hold a sequence number")]
    PacketTooShort(usize),

    #[error("connection closed by peer")]
    TransportClosed,

    #[error("no acknowledgment for sequence {sequence} after {attempts} attempts")]
    DeliveryFailure {
        sequence: u32,
        attempts: u32,
    },

    #[error("sequence {0} is already in flight")]
    SequenceInUse(u32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// true for errors caused by malformed data received from a peer
    pub fn is_decoding_error(&self) -> bool {
        matches!(self, ProtocolError::Decoding(_) | ProtocolError::PacketTooShort(_))
    }
}
