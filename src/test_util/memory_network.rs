use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::datagram::transport::DatagramTransport;

type Inbox = mpsc::UnboundedSender<(Bytes, SocketAddr)>;

/// A lossless in-memory datagram network. Datagrams are delivered in the order they were sent,
///  and datagrams sent to an address without an endpoint are silently lost, as with UDP.
///
/// Since no real I/O is involved, code running on it works with tokio's paused clock.
#[derive(Default)]
pub struct MemoryNetwork {
    inboxes: Arc<Mutex<FxHashMap<SocketAddr, Inbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> MemoryNetwork {
        Default::default()
    }

    /// Attach an endpoint to the network, replacing a previous endpoint at the same address
    pub fn endpoint(&self, addr: SocketAddr) -> Arc<MemoryEndpoint> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inboxes.lock().unwrap_or_else(PoisonError::into_inner)
            .insert(addr, sender.clone());

        Arc::new(MemoryEndpoint {
            addr,
            inboxes: self.inboxes.clone(),
            own_inbox: sender,
            inbox: tokio::sync::Mutex::new(receiver),
            sent: Default::default(),
        })
    }
}

pub struct MemoryEndpoint {
    addr: SocketAddr,
    inboxes: Arc<Mutex<FxHashMap<SocketAddr, Inbox>>>,
    own_inbox: Inbox,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

impl MemoryEndpoint {
    /// All datagrams sent through this endpoint so far, with their target addresses
    pub fn sent_packets(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DatagramTransport for MemoryEndpoint {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        let datagram = Bytes::copy_from_slice(buf);
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
            .push((to, datagram.clone()));

        if let Some(inbox) = self.inboxes.lock().unwrap_or_else(PoisonError::into_inner).get(&to) {
            let _ = inbox.send((datagram, self.addr));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((datagram, from)) => {
                let num_read = datagram.len().min(buf.len());
                buf[..num_read].copy_from_slice(&datagram[..num_read]);
                Ok((num_read, from))
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint was detached from the network")),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        let mut inboxes = self.inboxes.lock().unwrap_or_else(PoisonError::into_inner);
        if inboxes.get(&self.addr).is_some_and(|inbox| inbox.same_channel(&self.own_inbox)) {
            inboxes.remove(&self.addr);
        }
    }
}
