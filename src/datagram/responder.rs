use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::select;
use tracing::{debug, error, info, trace, warn};

use crate::config::ProtocolConfig;
use crate::datagram::loss_simulator::{DropDecision, LossSimulator};
use crate::datagram::packet;
use crate::datagram::transport::{DatagramTransport, MAX_DATAGRAM_SIZE};

/// Counters for what a responder did with the packets it received
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ResponderStats {
    pub received: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub acknowledged: u64,
}

/// The receiving side of the acknowledgment protocol: every packet that is not (deliberately)
///  dropped is acknowledged to its source address.
///
/// The responder has no memory of sequence numbers it saw before, so a retransmitted request is
///  simply acknowledged again. Packets from different sources are handled independently.
pub struct DatagramResponder<T: DatagramTransport, D: DropDecision = LossSimulator> {
    transport: Arc<T>,
    drop_decision: D,
    stats: ResponderStats,
}

impl DatagramResponder<UdpSocket, LossSimulator> {
    pub async fn bind(config: &ProtocolConfig) -> anyhow::Result<DatagramResponder<UdpSocket, LossSimulator>> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_address).await?;
        info!("datagram responder listening on {:?}, drop probability {}", socket.local_addr()?, config.p_drop);
        Ok(DatagramResponder::new(Arc::new(socket), LossSimulator::from_config(config)?))
    }
}

impl <T: DatagramTransport, D: DropDecision> DatagramResponder<T, D> {
    pub fn new(transport: Arc<T>, drop_decision: D) -> DatagramResponder<T, D> {
        DatagramResponder {
            transport,
            drop_decision,
            stats: ResponderStats::default(),
        }
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    pub fn stats(&self) -> ResponderStats {
        self.stats
    }

    /// Decide what to do with a single received datagram, returning the acknowledgment to send
    ///  back (if any)
    pub fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Option<Bytes> {
        self.stats.received += 1;

        let packet = match packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("discarding malformed datagram from {:?}: {}", from, e);
                self.stats.malformed += 1;
                return None;
            }
        };
        trace!(sequence = packet.sequence, payload_len = packet.payload.len(), "received packet from {:?}", from);

        if self.drop_decision.should_drop() {
            debug!(sequence = packet.sequence, "simulated drop of packet from {:?}", from);
            self.stats.dropped += 1;
            return None;
        }

        self.stats.acknowledged += 1;
        Some(packet::encode_ack(packet.sequence))
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Respond to packets until `shutdown` completes
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = select! {
                _ = &mut shutdown => {
                    info!("datagram responder shutting down: {:?}", self.stats);
                    return Ok(());
                }
                received = self.transport.recv_from(&mut buf) => received,
            };

            let (num_read, from) = match received {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            if let Some(ack) = self.handle_datagram(&buf[..num_read], from) {
                if let Err(e) = self.transport.send_to(&ack, from).await {
                    warn!("error sending acknowledgment to {:?}: {}", from, e);
                }
            }
        }
    }
}
