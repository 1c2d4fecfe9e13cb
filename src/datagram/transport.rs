use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Largest payload a UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// An unordered, loss-tolerant channel that delivers each datagram completely or not at all.
///
/// This decouples the acknowledgment protocol from the actual socket, so it can run over UDP
///  as well as over the in-memory network of [crate::test_util::memory_network].
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<()>;

    /// Wait for the next datagram, copying it into `buf` (truncating it if `buf` is too small)
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Best-effort variant of [DatagramTransport::recv_from], returning `None` if nothing
    ///  arrived within `timeout`
    async fn recv_from_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(timeout, self.recv_from(buf)).await {
            Ok(received) => received.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl DatagramTransport for UdpSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        UdpSocket::send_to(self, buf, to).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
