//! Two small message protocols on top of raw sockets.
//!
//! ## Stream framing
//!
//! On a reliable, ordered byte stream (TCP) every message is a frame:
//!
//! ```ascii
//! 0: payload length (u32 BE)
//! 4: payload - UTF-8 JSON, exactly `length` bytes
//! ```
//!
//! A frame is only interpreted once all of its bytes arrived. The server runs one independent
//!  session per accepted connection and answers every request frame with a reply frame, in order.
//!
//! ## Acknowledged datagrams
//!
//! On an unreliable datagram channel (UDP) every packet is
//!
//! ```ascii
//! 0: sequence number (u32 BE)
//! 4: payload - empty for an acknowledgment
//! ```
//!
//! The sender picks a sequence number and retransmits the *identical* packet until an ack with
//!  the same sequence number arrives or the configured number of attempts is used up. The
//!  responder is stateless: it acks every packet it does not (deliberately) drop, so duplicate
//!  requests just cause duplicate acks.
//!
//! There is no reassembly, reordering, congestion control or encryption - one logical message is
//!  one datagram.

pub mod config;
pub mod datagram;
pub mod error;
pub mod stream;
pub mod test_util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
