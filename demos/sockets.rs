use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use framelink::config::ProtocolConfig;
use framelink::datagram::reliable_client::ReliableDatagramClient;
use framelink::datagram::responder::DatagramResponder;
use framelink::error::ProtocolError;
use framelink::stream::session::ReceivedReplyHandler;
use framelink::stream::stream_client::StreamClient;
use framelink::stream::stream_server::StreamServer;
use serde_json::Value;
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Answer every frame with `{"received": <request>, "server": "ok"}`
    StreamServer {
        #[clap(long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Send JSON messages as frames and print the replies
    StreamClient {
        #[clap(long, default_value = "127.0.0.1:9000")]
        remote: SocketAddr,

        #[clap(default_value = r#"{"msg": "hello", "n": 1}"#)]
        messages: Vec<String>,
    },
    /// Acknowledge datagrams, dropping some of them at random
    DatagramResponder {
        #[clap(long, default_value = "0.0.0.0:9001")]
        bind: SocketAddr,

        #[clap(long, default_value_t = 0.0)]
        p_drop: f64,

        #[clap(long)]
        seed: Option<u64>,
    },
    /// Send a message as a datagram, retransmitting until it is acknowledged
    DatagramClient {
        #[clap(long, default_value = "127.0.0.1:9001")]
        remote: SocketAddr,

        #[clap(long, default_value_t = ProtocolConfig::DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        #[clap(long, default_value_t = 500)]
        timeout_millis: u64,

        #[clap(default_value = "sensor=27.3")]
        message: String,
    },
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    match args.command {
        Command::StreamServer { bind } => {
            let mut config = ProtocolConfig::default_stream();
            config.bind_address = bind;

            let server = StreamServer::bind(&config, Arc::new(ReceivedReplyHandler)).await?;
            server.serve().await
        }
        Command::StreamClient { remote, messages } => {
            let mut client = StreamClient::connect(remote).await?;
            for message in messages {
                let request: Value = serde_json::from_str(&message)?;
                let reply: Value = client.request(&request).await?;
                info!("reply: {}", reply);
            }
            client.close().await?;
            Ok(())
        }
        Command::DatagramResponder { bind, p_drop, seed } => {
            let mut config = ProtocolConfig::default_datagram();
            config.bind_address = bind;
            config.p_drop = p_drop;
            config.loss_seed = seed;

            let mut responder = DatagramResponder::bind(&config).await?;
            responder.run().await
        }
        Command::DatagramClient { remote, max_attempts, timeout_millis, message } => {
            let mut config = ProtocolConfig::new("0.0.0.0:0".parse()?, remote);
            config.max_attempts = max_attempts;
            config.timeout_per_attempt = Duration::from_millis(timeout_millis);

            let client = ReliableDatagramClient::connect(&config).await?;
            match client.send(message.as_bytes()).await {
                Ok(ack) => {
                    info!("ACK ok for sequence {} after {} attempt(s)", ack.sequence, ack.attempts);
                    Ok(())
                }
                Err(ProtocolError::DeliveryFailure { sequence, attempts }) => {
                    warn!("no ACK for sequence {} after {} attempts", sequence, attempts);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
