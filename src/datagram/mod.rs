//! Sequence-numbered packets with acknowledgment and retransmission over unreliable datagrams

pub mod loss_simulator;
pub mod packet;
pub mod reliable_client;
pub mod responder;
pub mod retry_state;
pub mod transport;
