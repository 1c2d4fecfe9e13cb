use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::ProtocolError;
use crate::stream::frame_codec::{self, FrameBuffer};
use crate::stream::map_disconnect;

/// Computes the reply for each request frame of a session. Replies are sent in the order
///  requests were decoded.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, peer_addr: SocketAddr, request: Value) -> Value;
}

/// Confirms every request by sending it back: `{"received": <request>, "server": "ok"}`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedReplyHandler;

#[async_trait]
impl FrameHandler for ReceivedReplyHandler {
    async fn on_frame(&self, _peer_addr: SocketAddr, request: Value) -> Value {
        json!({
            "received": request,
            "server": "ok",
        })
    }
}

/// Lifecycle of a server-side connection: `Open` for as long as frames are exchanged, `Closing`
///  after end-of-stream or a protocol error, `Closed` once resources are released. There is no
///  way back from `Closed`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Per-connection state on the server side. It is owned by its session loop exclusively.
#[derive(Debug)]
pub struct ConnectionContext {
    peer_addr: SocketAddr,
    buffer: FrameBuffer,
    state: SessionState,
}

impl ConnectionContext {
    pub fn new(peer_addr: SocketAddr) -> ConnectionContext {
        ConnectionContext {
            peer_addr,
            buffer: FrameBuffer::new(),
            state: SessionState::Open,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    fn begin_closing(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Closing;
        }
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.buffer = FrameBuffer::with_capacity(0);
    }
}

/// The server side of one stream connection: reads request frames, replies to each of them.
pub struct StreamSession<S> {
    stream: S,
    context: ConnectionContext,
    write_buf: BytesMut,
}

impl <S: AsyncRead + AsyncWrite + Unpin> StreamSession<S> {
    pub fn new(stream: S, peer_addr: SocketAddr) -> StreamSession<S> {
        StreamSession {
            stream,
            context: ConnectionContext::new(peer_addr),
            write_buf: BytesMut::new(),
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Serve the connection until the peer closes it (returning the number of frames that were
    ///  answered) or a frame turns out to be malformed. Either way, the stream is shut down and
    ///  the session ends up `Closed`.
    ///
    /// Replies to frames decoded before a malformed one are still sent.
    pub async fn run(&mut self, handler: &dyn FrameHandler) -> Result<u64, ProtocolError> {
        if self.context.state != SessionState::Open {
            return Err(ProtocolError::TransportClosed);
        }

        let result = self.serve_frames(handler).await;

        self.context.begin_closing();
        if let Err(e) = self.stream.shutdown().await {
            debug!("error shutting down connection to {}: {}", self.context.peer_addr, e);
        }
        self.context.close();

        result
    }

    async fn serve_frames(&mut self, handler: &dyn FrameHandler) -> Result<u64, ProtocolError> {
        let mut num_frames = 0;
        loop {
            let num_read = self.stream.read_buf(self.context.buffer.buf_mut()).await
                .map_err(map_disconnect)?;
            if num_read == 0 {
                if !self.context.buffer.is_empty() {
                    debug!("peer closed the connection with {} bytes of an incomplete frame", self.context.buffer.len());
                }
                return Ok(num_frames);
            }

            let decode_result = self.reply_to_buffered_frames(handler, &mut num_frames).await;

            if !self.write_buf.is_empty() {
                self.stream.write_all(&self.write_buf).await
                    .map_err(map_disconnect)?;
                self.write_buf.clear();
                self.stream.flush().await
                    .map_err(map_disconnect)?;
            }

            decode_result?;
        }
    }

    async fn reply_to_buffered_frames(&mut self, handler: &dyn FrameHandler, num_frames: &mut u64) -> Result<(), ProtocolError> {
        while let Some(request) = self.context.buffer.next_message::<Value>()? {
            trace!(?request, "received frame");
            let reply = handler.on_frame(self.context.peer_addr, request).await;
            frame_codec::encode_into(&reply, &mut self.write_buf)?;
            *num_frames += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from_str("127.0.0.1:4711").unwrap()
    }

    #[tokio::test]
    async fn test_received_reply_handler() {
        let reply = ReceivedReplyHandler.on_frame(peer(), json!({"msg": "hello", "n": 1})).await;
        assert_eq!(reply, json!({"received": {"msg": "hello", "n": 1}, "server": "ok"}));
    }

    #[test]
    fn test_context_transitions() {
        let mut context = ConnectionContext::new(peer());
        assert_eq!(context.state(), SessionState::Open);

        context.begin_closing();
        assert_eq!(context.state(), SessionState::Closing);

        context.close();
        assert_eq!(context.state(), SessionState::Closed);

        context.begin_closing();
        assert_eq!(context.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_session_replies_in_order() {
        let (mut client, server) = duplex(64);

        let server_task = tokio::spawn(async move {
            let mut session = StreamSession::new(server, peer());
            let result = session.run(&ReceivedReplyHandler).await;
            (result.unwrap(), session.context().state())
        });

        let mut requests = BytesMut::new();
        for n in 0..5 {
            frame_codec::encode_into(&json!({"n": n}), &mut requests).unwrap();
        }
        client.write_all(&requests).await.unwrap();

        let mut frame_buffer = FrameBuffer::new();
        let mut replies = Vec::new();
        while replies.len() < 5 {
            let num_read = client.read_buf(frame_buffer.buf_mut()).await.unwrap();
            assert_ne!(num_read, 0);
            while let Some(reply) = frame_buffer.next_message::<Value>().unwrap() {
                replies.push(reply);
            }
        }
        drop(client);

        for (n, reply) in replies.iter().enumerate() {
            assert_eq!(reply, &json!({"received": {"n": n}, "server": "ok"}));
        }

        let (num_frames, state) = server_task.await.unwrap();
        assert_eq!(num_frames, 5);
        assert_eq!(state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_session_partial_frame_then_eof() {
        let (mut client, server) = duplex(64);

        client.write_all(b"\0\0\0\x10{\"partial").await.unwrap();
        drop(client);

        let mut session = StreamSession::new(server, peer());
        assert_eq!(session.run(&ReceivedReplyHandler).await.unwrap(), 0);
        assert_eq!(session.context().state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_session_malformed_frame_is_fatal() {
        let (mut client, server) = duplex(256);

        let mut requests = BytesMut::new();
        frame_codec::encode_into(&json!({"n": 1}), &mut requests).unwrap();
        requests.extend_from_slice(b"\0\0\0\x03abc");
        client.write_all(&requests).await.unwrap();

        let mut session = StreamSession::new(server, peer());
        let result = session.run(&ReceivedReplyHandler).await;
        assert!(result.unwrap_err().is_decoding_error());
        assert_eq!(session.context().state(), SessionState::Closed);

        // the reply to the well-formed first frame was still sent before the connection closed
        let mut frame_buffer = FrameBuffer::new();
        while client.read_buf(frame_buffer.buf_mut()).await.unwrap() > 0 {}
        assert_eq!(frame_buffer.next_message::<Value>().unwrap(), Some(json!({"received": {"n": 1}, "server": "ok"})));
        assert!(frame_buffer.is_empty());

        match session.run(&ReceivedReplyHandler).await {
            Err(ProtocolError::TransportClosed) => {}
            other => panic!("a closed session must not be restarted: {:?}", other),
        }
    }
}
