use std::future::Future;
use std::net::SocketAddr;
use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, instrument, warn};

use crate::config::ProtocolConfig;
use crate::stream::session::{FrameHandler, StreamSession};

/// Accepts stream connections and runs an independent [StreamSession] for each of them.
///  There is no upper bound on the number of concurrent connections.
pub struct StreamServer {
    listener: TcpListener,
    handler: Arc<dyn FrameHandler>,
}

impl StreamServer {
    pub async fn bind(config: &ProtocolConfig, handler: Arc<dyn FrameHandler>) -> anyhow::Result<StreamServer> {
        let listener = TcpListener::bind(config.bind_address).await?;
        info!("stream server listening on {:?}", listener.local_addr()?);

        Ok(StreamServer {
            listener,
            handler,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(&self) -> anyhow::Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes. Sessions that are running at that point
    ///  are not affected, they end when their peers close the connection.
    pub async fn serve_until(&self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        let mut consecutive_accept_errors = 0u32;
        loop {
            let accepted = select! {
                _ = &mut shutdown => {
                    info!("stream server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(x) => x,
                Err(e) => {
                    consecutive_accept_errors += 1;
                    let backoff = accept_error_backoff(consecutive_accept_errors);
                    warn!("error accepting connection, retrying in {:?}: {}", backoff, e);
                    select! {
                        _ = &mut shutdown => {
                            info!("stream server shutting down");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    continue;
                }
            };
            consecutive_accept_errors = 0;
            tokio::spawn(handle_connection(stream, peer_addr, self.handler.clone()));
        }
    }
}

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Pause before accepting again after the n-th accept error in a row, doubling up to a maximum.
///  Errors like running out of file descriptors tend to persist for a while.
fn accept_error_backoff(consecutive_errors: u32) -> Duration {
    let exponent = min(consecutive_errors.saturating_sub(1), 16);
    min(MIN_ACCEPT_BACKOFF * (1 << exponent), MAX_ACCEPT_BACKOFF)
}

#[instrument(name="stream_session", skip_all, fields(peer = %peer_addr))]
async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, handler: Arc<dyn FrameHandler>) {
    debug!("accepted connection");
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not set TCP_NODELAY: {}", e);
    }

    let mut session = StreamSession::new(stream, peer_addr);
    match session.run(handler.as_ref()).await {
        Ok(num_frames) => debug!("peer closed the connection after {} frames", num_frames),
        Err(e) if e.is_decoding_error() => warn!("dropping connection after malformed frame: {}", e),
        Err(e) => warn!("connection broke with an error: {}", e),
    }
    debug!("closed {}", peer_addr);
}
