use std::net::SocketAddr;
use std::time::Duration;

use framelink::config::ProtocolConfig;
use framelink::datagram::reliable_client::{Ack, ReliableDatagramClient};
use framelink::datagram::responder::{DatagramResponder, ResponderStats};
use framelink::error::ProtocolError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Level;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

struct RunningResponder {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<ResponderStats>,
}

impl RunningResponder {
    async fn stop(self) -> ResponderStats {
        self.shutdown.send(()).unwrap();
        self.task.await.unwrap()
    }
}

async fn start_responder(p_drop: f64) -> RunningResponder {
    let mut config = ProtocolConfig::default_datagram();
    config.bind_address = "127.0.0.1:0".parse().unwrap();
    config.p_drop = p_drop;
    config.loss_seed = Some(17);

    let mut responder = DatagramResponder::bind(&config).await.unwrap();
    let addr = responder.local_addr().unwrap();

    let (shutdown, shutdown_receiver) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        responder.run_until(async { let _ = shutdown_receiver.await; }).await.unwrap();
        responder.stats()
    });

    RunningResponder { addr, shutdown, task }
}

async fn client_for(responder_addr: SocketAddr, timeout_per_attempt: Duration) -> ReliableDatagramClient<tokio::net::UdpSocket> {
    let mut config = ProtocolConfig::new("127.0.0.1:0".parse().unwrap(), responder_addr);
    config.timeout_per_attempt = timeout_per_attempt;
    ReliableDatagramClient::connect(&config).await.unwrap()
}

#[tokio::test]
async fn test_acknowledged() {
    let responder = start_responder(0.0).await;
    let client = client_for(responder.addr, Duration::from_millis(500)).await;

    assert_eq!(client.send(b"sensor=27.3").await.unwrap(), Ack { sequence: 1, attempts: 1 });
    drop(client);

    let stats = responder.stop().await;
    assert_eq!(stats, ResponderStats { received: 1, malformed: 0, dropped: 0, acknowledged: 1 });
}

#[tokio::test]
async fn test_everything_dropped() {
    let responder = start_responder(1.0).await;
    let client = client_for(responder.addr, Duration::from_millis(50)).await;

    match client.send_reliable(b"sensor=27.3", 3, Duration::from_millis(50)).await {
        Err(ProtocolError::DeliveryFailure { sequence: 1, attempts: 3 }) => {}
        other => panic!("expected delivery failure, was {:?}", other),
    }
    drop(client);

    let stats = responder.stop().await;
    assert_eq!(stats, ResponderStats { received: 3, malformed: 0, dropped: 3, acknowledged: 0 });
}

#[tokio::test]
async fn test_lossy_network() {
    let responder = start_responder(0.3).await;
    let client = client_for(responder.addr, Duration::from_millis(30)).await;

    let mut total_attempts = 0;
    for n in 0..10 {
        let message = format!("sensor={}", n);
        let ack = client.send_reliable(message.as_bytes(), 20, Duration::from_millis(30)).await.unwrap();
        total_attempts += ack.attempts;
    }
    drop(client);

    let stats = responder.stop().await;
    assert!(total_attempts >= 10);
    assert!(stats.acknowledged >= 10);
    assert_eq!(stats.received, stats.dropped + stats.acknowledged);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let responder = start_responder(0.0).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let addr = responder.addr;
        tasks.push(tokio::spawn(async move {
            let client = client_for(addr, Duration::from_millis(500)).await;
            for expected_sequence in 1..=3 {
                let ack = client.send(b"x").await.unwrap();
                assert_eq!(ack.sequence, expected_sequence);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = responder.stop().await;
    assert_eq!(stats.acknowledged, 15);
}
