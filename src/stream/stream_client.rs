use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::ProtocolError;
use crate::stream::frame_codec::{self, FrameBuffer};
use crate::stream::map_disconnect;

/// The client side of a stream connection, alternating between sending a request frame and
///  waiting for the complete reply frame. There is no pipelining.
pub struct StreamClient<S = TcpStream> {
    stream: S,
    buffer: FrameBuffer,
}

impl StreamClient<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Result<StreamClient<TcpStream>, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("connected to {}", addr);
        Ok(StreamClient::new(stream))
    }
}

impl <S: AsyncRead + AsyncWrite + Unpin> StreamClient<S> {
    pub fn new(stream: S) -> StreamClient<S> {
        StreamClient {
            stream,
            buffer: FrameBuffer::new(),
        }
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let frame = frame_codec::encode(message)?;
        self.stream.write_all(&frame).await
            .map_err(map_disconnect)?;
        self.stream.flush().await
            .map_err(map_disconnect)?;
        Ok(())
    }

    /// Wait for the next complete frame. If the connection ends before that,
    ///  [ProtocolError::TransportClosed] is returned.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        loop {
            if let Some(message) = self.buffer.next_message()? {
                return Ok(message);
            }

            let num_read = self.stream.read_buf(self.buffer.buf_mut()).await
                .map_err(map_disconnect)?;
            if num_read == 0 {
                trace!("end of stream with {} buffered bytes", self.buffer.len());
                return Err(ProtocolError::TransportClosed);
            }
        }
    }

    pub async fn request<Req: Serialize + ?Sized, Resp: DeserializeOwned>(&mut self, request: &Req) -> Result<Resp, ProtocolError> {
        self.send(request).await?;
        self.receive().await
    }

    /// Shut down the write direction and release the connection
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        match self.stream.shutdown().await.map_err(map_disconnect) {
            Ok(()) | Err(ProtocolError::TransportClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
