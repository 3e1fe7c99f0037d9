use std::{collections::HashMap, net::SocketAddr, time::Duration};

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::peer::{
    connection::{self, IoSender, Link},
    SessionId,
};

/// How the swarm reaches its peers. Every call is fire and forget: outcomes
/// come back to the torrent as [`IoEvent`](connection::IoEvent)s.
pub trait Transport {
    fn connect(&mut self, id: SessionId, addr: SocketAddr);

    fn write(&mut self, id: SessionId, bytes: Bytes);

    fn close(&mut self, id: SessionId);
}

/// Runs one tokio task per peer connection.
pub struct TcpTransport {
    links: HashMap<SessionId, Link>,
    io_tx: IoSender,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(io_tx: IoSender, connect_timeout: Duration) -> Self {
        Self {
            links: HashMap::new(),
            io_tx,
            connect_timeout,
        }
    }

    /// Takes over an accepted inbound stream for the session.
    pub fn attach(&mut self, id: SessionId, stream: TcpStream) {
        let link = connection::attach(id, stream, self.io_tx.clone());
        self.links.insert(id, link);
    }

    /// Closes every link and waits for their tasks to wind down.
    pub async fn shutdown(&mut self) {
        let handles = self.links.drain().map(|(_, link)| link.close());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                log::warn!("Connection task failed: {}", e);
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, id: SessionId, addr: SocketAddr) {
        let link = connection::connect(id, addr, self.connect_timeout, self.io_tx.clone());
        self.links.insert(id, link);
    }

    fn write(&mut self, id: SessionId, bytes: Bytes) {
        if let Some(link) = self.links.get(&id) {
            link.write(bytes);
        }
    }

    fn close(&mut self, id: SessionId) {
        // the task shuts the socket once its write channel is gone
        self.links.remove(&id);
    }
}
