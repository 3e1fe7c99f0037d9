//! A torrent is one tokio task that owns its [`Swarm`] and every peer
//! session in it.
//!
//! Connection tasks, the user's commands and the timer all feed the task
//! through channels, so the swarm is only ever mutated from its loop and
//! needs no locks.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Instant,
};

use tokio::{
    net::TcpListener,
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task, time,
};

use crate::{
    alert::{Alert, AlertSender},
    conf::{Conf, TorrentConf, MIN_TIMER_PERIOD},
    error::torrent::Result,
    peer::{connection::IoReceiver, PeerInfo},
    piece_picker::Progress,
    PeerId, Sha1Hash, TorrentId,
};

pub mod stats;
pub mod swarm;
pub mod transport;

use self::{
    stats::TorrentStats,
    swarm::{Swarm, SwarmParams},
    transport::TcpTransport,
};

/// The channel for communication with torrent.
pub type Sender = UnboundedSender<Command>;

/// The type of channel on which a torrent listens for commands.
type Receiver = UnboundedReceiver<Command>;

/// The commands a torrent accepts from its user.
#[derive(Debug)]
pub enum Command {
    /// Peers from discovery to connect to.
    AddPeers(Vec<PeerInfo>),
    /// Disconnect every peer but keep them for a later resume.
    Stop,
    Resume,
    /// Reply with a snapshot of the torrent's stats.
    Stats(oneshot::Sender<TorrentStats>),
    /// Post the torrent's stats as an alert.
    PostStats,
    /// Disconnect everything and end the task.
    Shutdown,
}

/// Parameters for the torrent constructor.
pub struct Params {
    pub id: TorrentId,
    pub info_hash: Sha1Hash,
    pub client_id: PeerId,
    /// If set, peers may connect to us on this address.
    pub listen_addr: Option<SocketAddr>,
    pub conf: TorrentConf,
    pub alert_tx: AlertSender,
}

impl Params {
    /// Takes the client id, listen port and torrent settings from the
    /// engine-wide configuration.
    pub fn new(id: TorrentId, info_hash: Sha1Hash, conf: &Conf, alert_tx: AlertSender) -> Self {
        Self {
            id,
            info_hash,
            client_id: conf.engine.client_id,
            listen_addr: Some(SocketAddr::new(
                Ipv4Addr::UNSPECIFIED.into(),
                conf.engine.listen_port,
            )),
            conf: conf.torrent.clone(),
            alert_tx,
        }
    }
}

pub struct Torrent<P> {
    id: TorrentId,
    swarm: Swarm<P, TcpTransport>,
    cmd_rx: Receiver,
    io_rx: IoReceiver,
    listen_addr: Option<SocketAddr>,
    alert_tx: AlertSender,
    conf: TorrentConf,
}

/// Spawns the torrent task. Returns the handle with which to command it and
/// the task's join handle.
pub fn spawn<P>(params: Params, progress: P) -> (Sender, task::JoinHandle<Result<()>>)
where
    P: Progress + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let mut torrent = Torrent::new(params, progress, cmd_rx);
    let handle = task::spawn(async move { torrent.run().await });
    (cmd_tx, handle)
}

impl<P: Progress> Torrent<P> {
    fn new(params: Params, progress: P, cmd_rx: Receiver) -> Self {
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let transport = TcpTransport::new(io_tx, params.conf.connect_timeout);
        let swarm = Swarm::new(
            SwarmParams {
                id: params.id,
                info_hash: params.info_hash,
                client_id: params.client_id,
                conf: params.conf.clone(),
                alert_tx: params.alert_tx.clone(),
            },
            progress,
            transport,
        );
        Self {
            id: params.id,
            swarm,
            cmd_rx,
            io_rx,
            listen_addr: params.listen_addr,
            alert_tx: params.alert_tx,
            conf: params.conf,
        }
    }

    /// Runs the torrent until it's shut down or its command channel closes.
    pub async fn run(&mut self) -> Result<()> {
        log::info!("Starting torrent {}", self.id);

        let listener = match self.listen_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                log::info!("Torrent {} listening on {}", self.id, listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        let mut ticker = time::interval(self.conf.tick_interval.max(MIN_TIMER_PERIOD));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.swarm.tick(Instant::now()),
                Some((id, event)) = self.io_rx.recv() => {
                    self.swarm.handle_io(id, event, Instant::now());
                }
                accepted = accept(listener.as_ref()) => match accepted {
                    Ok((stream, addr)) => {
                        if let Some(id) = self.swarm.accept(addr, Instant::now()) {
                            self.swarm.transport_mut().attach(id, stream);
                        }
                    }
                    Err(e) => log::warn!("Torrent {} failed to accept: {}", self.id, e),
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::AddPeers(peers)) => self.swarm.add_peers(peers, Instant::now()),
                    Some(Command::Stop) => self.swarm.stop(Instant::now()),
                    Some(Command::Resume) => self.swarm.resume(Instant::now()),
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.swarm.stats(Instant::now()));
                    }
                    Some(Command::PostStats) => {
                        let stats = Box::new(self.swarm.stats(Instant::now()));
                        if self.alert_tx.send(Alert::TorrentStats { id: self.id, stats }).is_err() {
                            log::debug!("Torrent {} alert receiver is gone", self.id);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        log::info!("Shutting down torrent {}", self.id);
        self.swarm.shutdown(Instant::now());
        self.swarm.transport_mut().shutdown().await;
        Ok(())
    }
}

/// Accepts on the listener, or never resolves without one.
async fn accept(
    listener: Option<&TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
