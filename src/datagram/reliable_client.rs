use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::ProtocolConfig;
use crate::datagram::packet;
use crate::datagram::retry_state::{AckOutcome, RetryAction, RetryState};
use crate::datagram::transport::{DatagramTransport, MAX_DATAGRAM_SIZE};
use crate::error::ProtocolError;

/// Successful outcome of a reliable send
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Ack {
    pub sequence: u32,
    /// number of transmissions it took, including the first one
    pub attempts: u32,
}

/// Routes incoming acknowledgments to the send operation waiting for them. Only the sequence
///  numbers travel through here, the retry state stays with its send operation.
type AckRoutes = Mutex<FxHashMap<u32, mpsc::UnboundedSender<u32>>>;

/// Sends messages to a single peer with at-least-once semantics, retransmitting each one until
///  it is acknowledged or its attempts are exhausted.
///
/// Any number of sends can be in flight concurrently, each with its own sequence number and
///  retry state. A background task receives acknowledgments and dispatches them by sequence
///  number; it is stopped when the client is dropped.
pub struct ReliableDatagramClient<T: DatagramTransport> {
    transport: Arc<T>,
    remote_addr: SocketAddr,
    max_attempts: u32,
    timeout_per_attempt: Duration,
    next_sequence: AtomicU32,
    ack_routes: Arc<AckRoutes>,
    recv_task: JoinHandle<()>,
}

impl ReliableDatagramClient<UdpSocket> {
    /// Bind a UDP socket to the configured bind address and send to the configured remote address
    pub async fn connect(config: &ProtocolConfig) -> anyhow::Result<ReliableDatagramClient<UdpSocket>> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_address).await?;
        info!("bound datagram client socket to {:?}", socket.local_addr()?);
        Ok(Self::new(Arc::new(socket), config))
    }
}

impl <T: DatagramTransport> ReliableDatagramClient<T> {
    /// Must be called from within a tokio runtime since it spawns the receive task
    pub fn new(transport: Arc<T>, config: &ProtocolConfig) -> ReliableDatagramClient<T> {
        let ack_routes: Arc<AckRoutes> = Default::default();
        let recv_task = tokio::spawn(recv_loop(transport.clone(), config.remote_address, ack_routes.clone()));

        ReliableDatagramClient {
            transport,
            remote_addr: config.remote_address,
            max_attempts: config.max_attempts,
            timeout_per_attempt: config.timeout_per_attempt,
            next_sequence: AtomicU32::new(1),
            ack_routes,
            recv_task,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Sequence numbers are assigned in ascending order, starting at 1
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence.fetch_add(1, Ordering::AcqRel)
    }

    /// Send with the configured number of attempts and per-attempt timeout
    pub async fn send(&self, message: &[u8]) -> Result<Ack, ProtocolError> {
        self.send_reliable(message, self.max_attempts, self.timeout_per_attempt).await
    }

    pub async fn send_reliable(&self, message: &[u8], max_attempts: u32, timeout_per_attempt: Duration) -> Result<Ack, ProtocolError> {
        let sequence = self.next_sequence();
        self.send_with_sequence(sequence, message, max_attempts, timeout_per_attempt).await
    }

    /// Send with a caller-chosen sequence number. It must not be in flight on this client already.
    pub async fn send_with_sequence(&self, sequence: u32, message: &[u8], max_attempts: u32, timeout_per_attempt: Duration) -> Result<Ack, ProtocolError> {
        let (ack_sender, mut ack_receiver) = mpsc::unbounded_channel();
        let _route = AckRoute::register(&self.ack_routes, sequence, ack_sender)?;

        let mut state = RetryState::new(sequence, message, max_attempts, timeout_per_attempt);
        let mut action = state.start();
        loop {
            match action {
                RetryAction::Transmit(packet) => {
                    if state.attempts() > 1 {
                        debug!(sequence, attempt = state.attempts(), "no acknowledgment - retransmitting");
                    }
                    // a failed transmission counts as a lost packet, the attempt still waits for its timeout
                    if let Err(e) = self.transport.send_to(&packet, self.remote_addr).await {
                        warn!(sequence, attempt = state.attempts(), "error sending datagram to {:?}: {}", self.remote_addr, e);
                    }
                }
                RetryAction::GiveUp { attempts } => {
                    warn!(sequence, attempts, "giving up on message without acknowledgment");
                    return Err(ProtocolError::DeliveryFailure { sequence, attempts });
                }
                RetryAction::Done => break,
            }

            if Self::await_ack(&mut state, &mut ack_receiver).await? {
                break;
            }
            action = state.on_timeout();
        }

        trace!(sequence, attempts = state.attempts(), "message acknowledged");
        Ok(Ack {
            sequence,
            attempts: state.attempts(),
        })
    }

    /// Wait for the acknowledgment of the current attempt, returning `false` on timeout. Other
    ///  acknowledgments do not extend the deadline.
    async fn await_ack(state: &mut RetryState, ack_receiver: &mut mpsc::UnboundedReceiver<u32>) -> Result<bool, ProtocolError> {
        let deadline = Instant::now() + state.timeout_per_attempt();
        loop {
            match time::timeout_at(deadline, ack_receiver.recv()).await {
                Err(_) => return Ok(false),
                Ok(None) => return Err(ProtocolError::TransportClosed),
                Ok(Some(acked)) => match state.on_ack(acked) {
                    AckOutcome::Accepted => return Ok(true),
                    outcome => trace!(sequence = state.sequence(), acked, ?outcome, "ignoring acknowledgment"),
                },
            }
        }
    }
}

impl <T: DatagramTransport> Drop for ReliableDatagramClient<T> {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Registration of a send operation in [AckRoutes], removed when the send operation ends
struct AckRoute<'a> {
    routes: &'a AckRoutes,
    sequence: u32,
}

impl <'a> AckRoute<'a> {
    fn register(routes: &'a AckRoutes, sequence: u32, ack_sender: mpsc::UnboundedSender<u32>) -> Result<AckRoute<'a>, ProtocolError> {
        let mut map = routes.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&sequence) {
            return Err(ProtocolError::SequenceInUse(sequence));
        }
        map.insert(sequence, ack_sender);
        Ok(AckRoute { routes, sequence })
    }
}

impl Drop for AckRoute<'_> {
    fn drop(&mut self) {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
            .remove(&self.sequence);
    }
}

async fn recv_loop<T: DatagramTransport>(transport: Arc<T>, remote_addr: SocketAddr, ack_routes: Arc<AckRoutes>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (num_read, from) = match transport.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };

        if from != remote_addr {
            debug!("ignoring datagram from unexpected peer {:?}", from);
            continue;
        }

        let packet = match packet::decode(&buf[..num_read]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("discarding malformed datagram from {:?}: {}", from, e);
                continue;
            }
        };
        if !packet.is_ack() {
            debug!("ignoring datagram with payload from {:?} - expecting acknowledgments only", from);
            continue;
        }

        let route = ack_routes.lock().unwrap_or_else(PoisonError::into_inner)
            .get(&packet.sequence)
            .cloned();
        match route {
            // the send operation may have ended in the meantime, that is fine
            Some(ack_sender) => { let _ = ack_sender.send(packet.sequence); }
            None => trace!(sequence = packet.sequence, "acknowledgment for a message that is not in flight - ignoring"),
        }
    }
}
