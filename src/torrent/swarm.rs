use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::mpsc;

use crate::{
    alert::{Alert, AlertSender},
    conf::TorrentConf,
    error::peer::PeerError,
    peer::{
        connection::IoEvent,
        session::{SessionConf, SessionContext},
        EventReceiver, EventSender, PeerEvent, PeerInfo, PeerSession, SessionId,
    },
    piece_picker::Progress,
    torrent::{
        stats::{TorrentStats, TransferTotals},
        transport::Transport,
    },
    Bitfield, PeerId, PieceIndex, Sha1Hash, TorrentId,
};

/// The window over which the stats' transfer rates are measured.
const RATE_WINDOW: Duration = Duration::from_secs(1);

pub struct SwarmParams {
    pub id: TorrentId,
    pub info_hash: Sha1Hash,
    pub client_id: PeerId,
    pub conf: TorrentConf,
    pub alert_tx: AlertSender,
}

/// Owns the peer sessions of one torrent.
///
/// The swarm decides whom to connect to, routes IO to the sessions, hands
/// out pieces to download and forwards downloaded pieces to the progress
/// collaborator. It is driven by a single task, see [`super::Torrent`].
pub struct Swarm<P, T> {
    id: TorrentId,
    ctx: Arc<SessionContext>,
    conf: TorrentConf,
    progress: P,
    transport: T,

    sessions: HashMap<SessionId, PeerSession>,
    /// Known peers not connected to, in the order they were learned.
    candidates: VecDeque<PeerInfo>,
    next_session_id: u64,

    event_tx: EventSender,
    event_rx: EventReceiver,
    alert_tx: AlertSender,

    /// Whether the swarm connects to peers and accepts connections.
    running: bool,
    /// What sessions that are gone have transferred.
    retired_uploaded: u64,
    retired_downloaded: u64,
}

impl<P: Progress, T: Transport> Swarm<P, T> {
    pub fn new(params: SwarmParams, progress: P, transport: T) -> Self {
        let ctx = Arc::new(SessionContext {
            info_hash: params.info_hash,
            client_id: params.client_id,
            piece_count: progress.own_pieces().len(),
        });
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            id: params.id,
            ctx,
            conf: params.conf,
            progress,
            transport,
            sessions: HashMap::new(),
            candidates: VecDeque::new(),
            next_session_id: 0,
            event_tx,
            event_rx,
            alert_tx: params.alert_tx,
            running: true,
            retired_uploaded: 0,
            retired_downloaded: 0,
        }
    }

    pub fn progress(&self) -> &P {
        &self.progress
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Our pieces, as advertised in handshakes.
    pub fn own_pieces(&self) -> &Bitfield {
        self.progress.own_pieces()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn session(&self, id: SessionId) -> Option<&PeerSession> {
        self.sessions.get(&id)
    }

    /// Learns of new peers and connects to as many as allowed.
    pub fn add_peers(&mut self, peers: Vec<PeerInfo>, now: Instant) {
        for peer in peers {
            if self.is_known(&peer.addr) {
                continue;
            }
            self.candidates.push_back(peer);
        }
        log::debug!(
            "Torrent {} has {} candidate peers",
            self.id,
            self.candidates.len()
        );
        self.connect_if_needed(now);
    }

    fn is_known(&self, addr: &SocketAddr) -> bool {
        self.candidates.iter().any(|p| p.addr == *addr)
            || self.sessions.values().any(|s| s.info().addr == *addr)
    }

    /// Connects to candidates up to the peer limit. Asks for more peers if
    /// there are still fewer sessions than wanted afterwards.
    fn connect_if_needed(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        while self.sessions.len() < self.conf.max_peers {
            let Some(info) = self.candidates.pop_front() else {
                break;
            };
            let id = self.next_id();
            log::info!("Torrent {} connecting to {}", self.id, info.addr);
            let session = PeerSession::outbound(
                id,
                info,
                Arc::clone(&self.ctx),
                SessionConf::from(&self.conf),
                self.event_tx.clone(),
                now,
            );
            self.sessions.insert(id, session);
            self.transport.connect(id, info.addr);
        }

        if self.sessions.len() < self.conf.min_peers {
            log::debug!(
                "Torrent {} has {} peers, wants {}",
                self.id,
                self.sessions.len(),
                self.conf.min_peers
            );
            self.alert(Alert::NeedMorePeers {
                id: self.id,
                totals: self.transfer_totals(),
            });
        }
    }

    fn next_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        id
    }

    /// Admits a peer that connected to us. Returns the session to attach
    /// the connection to, or `None` if the peer is refused.
    pub fn accept(&mut self, addr: SocketAddr, now: Instant) -> Option<SessionId> {
        if !self.running || self.sessions.len() >= self.conf.max_peers {
            log::debug!("Torrent {} refusing inbound peer {}", self.id, addr);
            return None;
        }
        self.candidates.retain(|p| p.addr != addr);
        let id = self.next_id();
        log::info!("Torrent {} accepted peer {}", self.id, addr);
        let session = PeerSession::inbound(
            id,
            PeerInfo::from(addr),
            Arc::clone(&self.ctx),
            SessionConf::from(&self.conf),
            self.event_tx.clone(),
            now,
        );
        self.sessions.insert(id, session);
        Some(id)
    }

    /// Routes an event of a connection task to its session.
    pub fn handle_io(&mut self, id: SessionId, event: IoEvent, now: Instant) {
        let Some(session) = self.sessions.get_mut(&id) else {
            log::trace!("IO event for closed session {}", id);
            return;
        };
        let result = match event {
            IoEvent::Connected => session.on_connected(self.progress.own_pieces(), now),
            IoEvent::Data(data) => session.receive(&data, &mut self.progress, now),
            IoEvent::Written(n) => session.on_written(n, now),
            IoEvent::Disconnected(error) => {
                match error {
                    Some(e) => log::info!("Peer {} lost: {}", session.info().addr, e),
                    None => log::info!("Peer {} closed the connection", session.info().addr),
                }
                self.remove_peer(id, now);
                self.process_events(now);
                return;
            }
        };
        if let Err(e) = result {
            self.drop_peer(id, e, now);
        }
        self.process_events(now);
    }

    fn drop_peer(&mut self, id: SessionId, error: PeerError, now: Instant) {
        if let Some(session) = self.sessions.get(&id) {
            log::warn!("Dropping peer {}: {}", session.info().addr, error);
        }
        self.remove_peer(id, now);
    }

    /// Removes the session, failing its downloads, and fills its slot.
    fn remove_peer(&mut self, id: SessionId, now: Instant) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        if let Err(e) = session.disconnect() {
            log::warn!("Error disconnecting peer {}: {}", session.info().addr, e);
        }
        self.retired_uploaded += session.counters().uploaded.total();
        self.retired_downloaded += session.counters().downloaded.total();
        self.transport.close(id);
        self.connect_if_needed(now);
    }

    /// Handles what the sessions reported, then writes out what they sent.
    fn process_events(&mut self, now: Instant) {
        loop {
            let mut dropped = Vec::new();
            while let Ok((id, event)) = self.event_rx.try_recv() {
                self.handle_event(id, event, &mut dropped);
            }
            if dropped.is_empty() {
                break;
            }
            for (id, error) in dropped {
                self.drop_peer(id, error, now);
            }
        }
        self.flush();
    }

    fn handle_event(
        &mut self,
        id: SessionId,
        event: PeerEvent,
        dropped: &mut Vec<(SessionId, PeerError)>,
    ) {
        match event {
            PeerEvent::NewPiecesAvailable => {}
            PeerEvent::PieceDownloaded { index, data } => {
                self.piece_downloaded(id, index, data, dropped);
            }
            PeerEvent::PieceFailed { index } => {
                log::debug!("Torrent {} piece {} failed", self.id, index);
                self.progress.mark_lost(index);
                return;
            }
        }
        if let Err(e) = self.request_pieces(id) {
            dropped.push((id, e));
        }
    }

    fn piece_downloaded(
        &mut self,
        from: SessionId,
        index: PieceIndex,
        data: Vec<u8>,
        dropped: &mut Vec<(SessionId, PeerError)>,
    ) {
        if let Err(e) = self.progress.mark_downloaded(index, data) {
            log::warn!("Torrent {} rejected piece {}: {}", self.id, index, e);
            self.alert(Alert::Error {
                id: self.id,
                error: e.into(),
            });
            return;
        }

        log::info!("Torrent {} completed piece {}", self.id, index);
        self.alert(Alert::PieceCompleted { id: self.id, index });
        for (id, session) in self.sessions.iter_mut() {
            if *id == from {
                continue;
            }
            if let Err(e) = session.send_have(index) {
                dropped.push((*id, e));
            }
        }

        if self.progress.own_pieces().is_complete() {
            log::info!("Torrent {} complete", self.id);
            self.alert(Alert::TorrentComplete(self.id));
        }
    }

    /// Gives the session pieces to download until it's at its cap or the
    /// peer has nothing more for us.
    fn request_pieces(&mut self, id: SessionId) -> Result<(), PeerError> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        if !session.is_connected() {
            return Ok(());
        }
        while session.can_take_piece() {
            let Some(request) = self.progress.next_piece(session.pieces()) else {
                break;
            };
            if let Err(e) = session.download_piece(request.index, request.len) {
                self.progress.mark_lost(request.index);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Hands the bytes the sessions want written to the transport.
    fn flush(&mut self) {
        for (id, session) in self.sessions.iter_mut() {
            if let Some(bytes) = session.take_outgoing() {
                self.transport.write(*id, bytes);
            }
        }
    }

    /// Runs the sessions' timers.
    pub fn tick(&mut self, now: Instant) {
        let mut dropped = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            if let Err(e) = session.tick(now) {
                dropped.push((*id, e));
            }
        }
        for (id, error) in dropped {
            self.drop_peer(id, error, now);
        }
        self.process_events(now);
    }

    /// Disconnects every peer but remembers them for [`Swarm::resume`].
    pub fn stop(&mut self, now: Instant) {
        log::info!("Stopping torrent {}", self.id);
        self.running = false;
        let ids: Vec<_> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = self.sessions.get(&id) {
                self.candidates.push_back(*session.info());
            }
            self.remove_peer(id, now);
        }
        self.process_events(now);
    }

    pub fn resume(&mut self, now: Instant) {
        log::info!("Resuming torrent {}", self.id);
        self.running = true;
        self.connect_if_needed(now);
        self.process_events(now);
    }

    /// Disconnects every peer and forgets all of them.
    pub fn shutdown(&mut self, now: Instant) {
        self.stop(now);
        self.candidates.clear();
    }

    /// What an announce to a tracker would report.
    pub fn transfer_totals(&self) -> TransferTotals {
        let (uploaded, downloaded) = self.sessions.values().fold(
            (self.retired_uploaded, self.retired_downloaded),
            |(up, down), s| {
                (
                    up + s.counters().uploaded.total(),
                    down + s.counters().downloaded.total(),
                )
            },
        );
        TransferTotals {
            uploaded,
            downloaded,
            left: self.progress.left(),
            peers_wanted: self.conf.max_peers.saturating_sub(self.sessions.len()),
        }
    }

    /// Bytes uploaded and downloaded by the current sessions within the
    /// `window` preceding `now`.
    pub fn transferred_over(&self, window: Duration, now: Instant) -> (u64, u64) {
        self.sessions.values().fold((0, 0), |(up, down), s| {
            (
                up + s.counters().uploaded.over(window, now),
                down + s.counters().downloaded.over(window, now),
            )
        })
    }

    pub fn stats(&self, now: Instant) -> TorrentStats {
        let connected = self.sessions.values().filter(|s| s.is_connected());
        let (connected_count, seed_count) = connected.fold((0, 0), |(c, s), session| {
            (c + 1, s + session.is_seed() as usize)
        });
        let (upload_rate, download_rate) = self.transferred_over(RATE_WINDOW, now);
        let totals = self.transfer_totals();
        TorrentStats {
            connected_count,
            seed_count,
            session_count: self.sessions.len(),
            candidate_count: self.candidates.len(),
            piece_count: self.ctx.piece_count,
            pieces_have: self.progress.own_pieces().count_ones(),
            upload_rate,
            download_rate,
            uploaded: totals.uploaded,
            downloaded: totals.downloaded,
        }
    }

    fn alert(&self, alert: Alert) {
        if self.alert_tx.send(alert).is_err() {
            log::debug!("Torrent {} alert receiver is gone", self.id);
        }
    }
}
