//! Length-prefixed JSON frames over reliable byte streams

use std::io;

use crate::error::ProtocolError;

pub mod frame_codec;
pub mod session;
pub mod stream_client;
pub mod stream_server;

/// Errors caused by the peer going away are reported as [ProtocolError::TransportClosed] so
///  callers can tell them apart from actual I/O failures
fn map_disconnect(e: io::Error) -> ProtocolError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ProtocolError::TransportClosed,
        _ => ProtocolError::Io(e),
    }
}
