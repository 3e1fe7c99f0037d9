//! The tokio tasks moving a peer's bytes.
//!
//! A connection task knows nothing of the protocol. It reports what happens
//! on the socket to the torrent as [`IoEvent`]s and writes whatever bytes the
//! torrent hands it, in order.

use std::{io, net::SocketAddr, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time,
};

use crate::peer::SessionId;

const READ_BUF_LEN: usize = 32 * 1024;

#[derive(Debug)]
pub enum IoEvent {
    /// The outbound connection is established.
    Connected,
    /// Bytes read from the socket.
    Data(Bytes),
    /// This many of the bytes handed to the task were written.
    Written(usize),
    /// The connection is gone. Sent exactly once, last.
    Disconnected(Option<io::Error>),
}

/// The channel on which connection tasks report to their torrent.
pub type IoSender = UnboundedSender<(SessionId, IoEvent)>;
pub type IoReceiver = UnboundedReceiver<(SessionId, IoEvent)>;

/// The torrent's end of a connection task.
pub struct Link {
    write_tx: UnboundedSender<Bytes>,
    handle: JoinHandle<()>,
}

impl Link {
    /// Queues bytes for writing. If the task is already gone, its
    /// `Disconnected` event is on its way and the bytes don't matter.
    pub fn write(&self, bytes: Bytes) {
        let _ = self.write_tx.send(bytes);
    }

    /// Asks the task to shut the connection down and returns its handle.
    pub fn close(self) -> JoinHandle<()> {
        drop(self.write_tx);
        self.handle
    }
}

/// Spawns a task connecting to the peer, giving up after `timeout`.
pub fn connect(id: SessionId, addr: SocketAddr, timeout: Duration, io_tx: IoSender) -> Link {
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        log::debug!("[Peer {}] Connecting", addr);
        let stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let _ = io_tx.send((id, IoEvent::Disconnected(Some(e))));
                return;
            }
            Err(_) => {
                let e = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                let _ = io_tx.send((id, IoEvent::Disconnected(Some(e))));
                return;
            }
        };
        if io_tx.send((id, IoEvent::Connected)).is_err() {
            return;
        }
        run(id, stream, write_rx, io_tx).await;
    });
    Link { write_tx, handle }
}

/// Spawns a task for an accepted connection.
pub fn attach(id: SessionId, stream: TcpStream, io_tx: IoSender) -> Link {
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(id, stream, write_rx, io_tx));
    Link { write_tx, handle }
}

async fn run(
    id: SessionId,
    stream: TcpStream,
    write_rx: UnboundedReceiver<Bytes>,
    io_tx: IoSender,
) {
    let result = pump(id, stream, write_rx, &io_tx).await;
    if let Err(e) = &result {
        log::debug!("Connection of session {} failed: {}", id, e);
    }
    let _ = io_tx.send((id, IoEvent::Disconnected(result.err())));
}

/// Moves bytes both ways until either side hangs up.
async fn pump(
    id: SessionId,
    stream: TcpStream,
    mut write_rx: UnboundedReceiver<Bytes>,
    io_tx: &IoSender,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUF_LEN);
    loop {
        buf.reserve(READ_BUF_LEN);
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(());
                }
                if io_tx.send((id, IoEvent::Data(buf.split().freeze()))).is_err() {
                    return Ok(());
                }
            }
            bytes = write_rx.recv() => {
                let Some(bytes) = bytes else {
                    // the torrent closed the link
                    let _ = writer.shutdown().await;
                    return Ok(());
                };
                writer.write_all(&bytes).await?;
                if io_tx.send((id, IoEvent::Written(bytes.len()))).is_err() {
                    return Ok(());
                }
            }
        }
    }
}
