use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{
    blockinfo::BlockInfo,
    conf::{TorrentConf, MIN_TIMER_PERIOD},
    counter::ThruputCounters,
    error::peer::{PeerError, Result},
    peer::{
        codec::{Handshake, Message, PeerIdMatch},
        communicator::{Communicator, Inbound, SendToken},
        piece::{PieceBuffer, UploadBuffer},
        ConnectionState, Direction, EventSender, PeerEvent, PeerInfo, SessionId,
        SessionState,
    },
    piece_picker::PieceReader,
    Bitfield, PeerId, PieceIndex, Sha1Hash,
};

/// Torrent-wide information every session of the torrent needs.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub info_hash: Sha1Hash,
    /// Sent in our handshake.
    pub client_id: PeerId,
    pub piece_count: usize,
}

/// The tunables of a session, taken from the torrent's config.
#[derive(Clone, Copy, Debug)]
pub struct SessionConf {
    pub request_window: usize,
    pub max_pieces: usize,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
}

impl From<&TorrentConf> for SessionConf {
    fn from(conf: &TorrentConf) -> Self {
        Self {
            request_window: conf.request_window,
            max_pieces: conf.max_pieces_per_peer,
            keep_alive_interval: conf.keep_alive_interval.max(MIN_TIMER_PERIOD),
            keep_alive_timeout: conf.keep_alive_timeout.max(MIN_TIMER_PERIOD),
        }
    }
}

/// The state machine of a connection with one peer.
///
/// The session does no IO of its own. Received bytes are fed in with
/// [`PeerSession::receive`], the bytes to write are drained with
/// [`PeerSession::take_outgoing`], and the transport's write progress is
/// reported back with [`PeerSession::on_written`]. What the torrent needs
/// to act on is posted as [`PeerEvent`]s.
pub struct PeerSession {
    id: SessionId,
    info: PeerInfo,
    direction: Direction,
    ctx: Arc<SessionContext>,
    conf: SessionConf,

    communicator: Communicator,
    state: SessionState,
    handshake_sent: bool,
    /// The pieces the peer advertised.
    pieces: Bitfield,

    /// Our in-progress downloads from this peer, sharing one request window.
    downloads: Vec<PieceBuffer>,
    /// The peer's queued requests, grouped by piece.
    uploads: VecDeque<UploadBuffer>,
    /// The block whose send we're waiting on, if any.
    upload_in_flight: Option<BlockInfo>,

    counters: ThruputCounters,
    last_received: Instant,
    last_keep_alive: Instant,

    events: EventSender,
}

impl PeerSession {
    /// A session we initiate. It starts out connecting.
    pub fn outbound(
        id: SessionId,
        info: PeerInfo,
        ctx: Arc<SessionContext>,
        conf: SessionConf,
        events: EventSender,
        now: Instant,
    ) -> Self {
        let mut session = Self::new(id, info, Direction::Outbound, ctx, conf, events, now);
        session.state.connection = ConnectionState::Connecting;
        session
    }

    /// A session for a connection the peer initiated. The transport is
    /// already up and we wait for the peer's handshake.
    pub fn inbound(
        id: SessionId,
        info: PeerInfo,
        ctx: Arc<SessionContext>,
        conf: SessionConf,
        events: EventSender,
        now: Instant,
    ) -> Self {
        let mut session = Self::new(id, info, Direction::Inbound, ctx, conf, events, now);
        session.state.connection = ConnectionState::Handshaking;
        session
    }

    fn new(
        id: SessionId,
        info: PeerInfo,
        direction: Direction,
        ctx: Arc<SessionContext>,
        conf: SessionConf,
        events: EventSender,
        now: Instant,
    ) -> Self {
        let communicator = Communicator::new(ctx.info_hash, PeerIdMatch::from(info.id));
        let pieces = Bitfield::new(ctx.piece_count);
        Self {
            id,
            info,
            direction,
            ctx,
            conf,
            communicator,
            state: SessionState::default(),
            handshake_sent: false,
            pieces,
            downloads: Vec::new(),
            uploads: VecDeque::new(),
            upload_in_flight: None,
            counters: ThruputCounters::new(now),
            last_received: now,
            last_keep_alive: now,
            events,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connection == ConnectionState::Connected
    }

    /// The pieces the peer advertised.
    pub fn pieces(&self) -> &Bitfield {
        &self.pieces
    }

    pub fn is_seed(&self) -> bool {
        self.pieces.is_complete()
    }

    pub fn counters(&self) -> &ThruputCounters {
        &self.counters
    }

    /// The pieces being downloaded from this peer.
    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }

    pub fn can_take_piece(&self) -> bool {
        self.downloads.len() < self.conf.max_pieces
    }

    /// Block requests sent and not yet answered.
    pub fn pending_request_count(&self) -> usize {
        self.downloads.iter().map(|d| d.pending().len()).sum()
    }

    /// The outbound transport came up: introduce ourselves.
    pub fn on_connected(&mut self, own_pieces: &Bitfield, now: Instant) -> Result<()> {
        peer_info!(self, "Connected, sending handshake");
        self.state.connection = ConnectionState::Handshaking;
        self.last_received = now;
        self.send_handshake(own_pieces)
    }

    fn send_handshake(&mut self, own_pieces: &Bitfield) -> Result<()> {
        let handshake = Handshake::new(self.ctx.info_hash, self.ctx.client_id);
        self.communicator
            .send_handshake(handshake, Some(SendToken::Handshake))?;
        self.handshake_sent = true;
        self.communicator
            .send(Message::Bitfield(Bytes::from(own_pieces.to_bytes())), None)?;
        Ok(())
    }

    /// Processes bytes received from the peer.
    pub fn receive(
        &mut self,
        data: &[u8],
        source: &mut dyn PieceReader,
        now: Instant,
    ) -> Result<()> {
        for inbound in self.communicator.receive(data)? {
            self.last_received = now;
            match inbound {
                Inbound::Handshake(handshake) => self.handle_handshake(handshake, source, now)?,
                Inbound::Message(msg) => self.handle_msg(msg, source, now)?,
            }
        }
        Ok(())
    }

    fn handle_handshake(
        &mut self,
        handshake: Handshake,
        source: &mut dyn PieceReader,
        now: Instant,
    ) -> Result<()> {
        peer_info!(
            self,
            "Handshake received, id {}",
            String::from_utf8_lossy(&handshake.peer_id)
        );
        self.state.peer_id = Some(handshake.peer_id);
        self.state.dht = handshake.supports_dht();
        if !self.handshake_sent {
            self.send_handshake(source.own_pieces())?;
        }
        self.state.connection = ConnectionState::Connected;
        self.last_keep_alive = now;
        Ok(())
    }

    fn handle_msg(
        &mut self,
        msg: Message,
        source: &mut dyn PieceReader,
        now: Instant,
    ) -> Result<()> {
        match msg {
            Message::KeepAlive => {
                peer_trace!(self, "Received keep-alive");
            }
            Message::Choke => {
                peer_debug!(self, "Choked");
                self.state.peer_choking = true;
                self.fail_downloads()?;
            }
            Message::Unchoke => {
                peer_debug!(self, "Unchoked");
                self.state.peer_choking = false;
                self.fill_request_window()?;
            }
            Message::Interested => {
                peer_debug!(self, "Peer became interested");
                self.state.peer_interested = true;
                if self.state.am_choking {
                    self.state.am_choking = false;
                    self.communicator.send(Message::Unchoke, None)?;
                }
            }
            Message::NotInterested => {
                peer_debug!(self, "Peer no longer interested");
                self.state.peer_interested = false;
                self.uploads.clear();
            }
            Message::Have { piece_index } => {
                if piece_index >= self.ctx.piece_count {
                    return Err(PeerError::InvalidPieceIndex(piece_index));
                }
                if !self.pieces.get(piece_index) {
                    peer_trace!(self, "Peer has piece {}", piece_index);
                    self.pieces.set(piece_index, true);
                    self.notify_new_pieces()?;
                }
            }
            Message::Bitfield(bytes) => {
                self.pieces = Bitfield::from_bytes(&bytes, self.ctx.piece_count)?;
                peer_debug!(
                    self,
                    "Peer has {}/{} pieces",
                    self.pieces.count_ones(),
                    self.pieces.len()
                );
                self.notify_new_pieces()?;
            }
            Message::Request(block) => self.handle_request(block, source)?,
            Message::Block {
                piece_index,
                offset,
                data,
            } => self.handle_block(piece_index, offset, &data, now)?,
            Message::Cancel(block) => {
                for upload in self.uploads.iter_mut() {
                    if upload.remove_request(&block) {
                        peer_debug!(self, "Peer cancelled {}", block);
                        break;
                    }
                }
                self.uploads.retain(UploadBuffer::has_requests);
            }
            Message::Port(port) => {
                peer_trace!(self, "Ignoring DHT port {}", port);
            }
        }
        Ok(())
    }

    fn notify_new_pieces(&mut self) -> Result<()> {
        if self.can_take_piece() {
            self.events.send((self.id, PeerEvent::NewPiecesAvailable))?;
        }
        Ok(())
    }

    /// Starts downloading the piece from this peer.
    ///
    /// Interest is declared on the first download. Blocks are requested as
    /// soon as the peer unchokes us.
    pub fn download_piece(&mut self, index: PieceIndex, len: u32) -> Result<()> {
        if self.downloads.iter().any(|d| d.index() == index) {
            return Ok(());
        }
        peer_debug!(self, "Downloading piece {} ({} bytes)", index, len);
        self.downloads.push(PieceBuffer::new(index, len));
        if !self.state.am_interested {
            self.state.am_interested = true;
            self.communicator.send(Message::Interested, None)?;
        }
        self.fill_request_window()
    }

    /// Abandons the download of the piece, cancelling its pending requests.
    pub fn cancel_download(&mut self, index: PieceIndex) -> Result<()> {
        let Some(pos) = self.downloads.iter().position(|d| d.index() == index) else {
            return Ok(());
        };
        let download = self.downloads.swap_remove(pos);
        for block in download.pending() {
            self.communicator.send(Message::Cancel(*block), None)?;
        }
        self.events
            .send((self.id, PeerEvent::PieceFailed { index }))?;
        Ok(())
    }

    /// Tops up the pending requests to the window size, piece by piece.
    fn fill_request_window(&mut self) -> Result<()> {
        if self.state.peer_choking {
            return Ok(());
        }
        let mut pending = self.pending_request_count();
        for download in self.downloads.iter_mut() {
            while pending < self.conf.request_window {
                let Some(block) = download.next_block() else {
                    break;
                };
                self.communicator.send(Message::Request(block), None)?;
                pending += 1;
            }
        }
        Ok(())
    }

    fn handle_block(
        &mut self,
        piece_index: PieceIndex,
        offset: u32,
        data: &[u8],
        now: Instant,
    ) -> Result<()> {
        self.counters.downloaded.record(data.len() as u64, now);
        let Some(pos) = self.downloads.iter().position(|d| d.index() == piece_index) else {
            peer_debug!(self, "Dropping block of piece {} we're not downloading", piece_index);
            return Ok(());
        };
        if !self.downloads[pos].accept_block(offset, data) {
            peer_debug!(self, "Dropping unrequested block at {} of piece {}", offset, piece_index);
            return Ok(());
        }

        if self.downloads[pos].is_complete() {
            let download = self.downloads.swap_remove(pos);
            peer_debug!(self, "Finished piece {}", piece_index);
            self.events.send((
                self.id,
                PeerEvent::PieceDownloaded {
                    index: piece_index,
                    data: download.into_data(),
                },
            ))?;
        }
        self.fill_request_window()
    }

    /// Every download in progress is dropped and reported failed.
    fn fail_downloads(&mut self) -> Result<()> {
        for download in self.downloads.drain(..) {
            self.events.send((
                self.id,
                PeerEvent::PieceFailed {
                    index: download.index(),
                },
            ))?;
        }
        Ok(())
    }

    fn handle_request(&mut self, block: BlockInfo, source: &mut dyn PieceReader) -> Result<()> {
        if block.piece_index >= self.ctx.piece_count {
            return Err(PeerError::InvalidPieceIndex(block.piece_index));
        }
        match self.uploads.iter_mut().find(|u| u.index() == block.piece_index) {
            Some(upload) => upload.add_request(block)?,
            None => {
                let data = match source.read_piece(block.piece_index) {
                    Ok(data) => data,
                    Err(e) => {
                        peer_warn!(self, "Cannot serve {}: {}", block, e);
                        return Ok(());
                    }
                };
                let mut upload = UploadBuffer::new(block.piece_index, Bytes::from(data));
                upload.add_request(block)?;
                self.uploads.push_back(upload);
            }
        }
        self.send_next_upload()
    }

    /// Sends the next queued block unless one is already on its way.
    fn send_next_upload(&mut self) -> Result<()> {
        if self.upload_in_flight.is_some() {
            return Ok(());
        }
        while let Some(upload) = self.uploads.front_mut() {
            match upload.next_block() {
                Some((block, data)) => {
                    peer_trace!(self, "Sending {}", block);
                    self.communicator.send(
                        Message::Block {
                            piece_index: block.piece_index,
                            offset: block.offset,
                            data,
                        },
                        Some(SendToken::Block(block)),
                    )?;
                    self.upload_in_flight = Some(block);
                    break;
                }
                None => {
                    self.uploads.pop_front();
                }
            }
        }
        Ok(())
    }

    /// Chokes the peer, dropping its queued requests.
    pub fn choke_peer(&mut self) -> Result<()> {
        if self.state.am_choking {
            return Ok(());
        }
        self.state.am_choking = true;
        self.uploads.clear();
        self.communicator.send(Message::Choke, None)
    }

    /// Announces a piece we just got.
    pub fn send_have(&mut self, index: PieceIndex) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.communicator
            .send(Message::Have { piece_index: index }, None)
    }

    /// Takes the bytes to be written to the peer.
    pub fn take_outgoing(&mut self) -> Option<Bytes> {
        self.communicator.take_outgoing()
    }

    /// The transport wrote `n` bytes of what was taken.
    pub fn on_written(&mut self, n: usize, now: Instant) -> Result<()> {
        for token in self.communicator.on_written(n) {
            match token {
                SendToken::Handshake => peer_trace!(self, "Handshake sent"),
                SendToken::Block(block) => {
                    self.counters.uploaded.record(block.len as u64, now);
                    if self.upload_in_flight == Some(block) {
                        self.upload_in_flight = None;
                    }
                }
            }
        }
        self.send_next_upload()
    }

    /// Runs the session's timers.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.state.connection == ConnectionState::Connecting {
            return Ok(());
        }
        if now.saturating_duration_since(self.last_received) >= self.conf.keep_alive_timeout {
            peer_info!(self, "Nothing received for {:?}", self.conf.keep_alive_timeout);
            return Err(PeerError::InactivityTimeout);
        }
        if self.is_connected()
            && now.saturating_duration_since(self.last_keep_alive) >= self.conf.keep_alive_interval
        {
            peer_trace!(self, "Sending keep-alive");
            self.communicator.send(Message::KeepAlive, None)?;
            self.last_keep_alive = now;
        }
        Ok(())
    }

    /// Tears the session down. Downloads in progress are reported failed.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state.connection == ConnectionState::Disconnected {
            return Ok(());
        }
        peer_info!(self, "Disconnecting");
        self.state.connection = ConnectionState::Disconnected;
        self.uploads.clear();
        self.upload_in_flight = None;
        self.fail_downloads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::disk::ReadError,
        peer::codec::{HandshakeCodec, MessageParser},
        BLOCK_LEN,
    };
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use tokio_util::codec::{Decoder, Encoder};

    const INFO_HASH: Sha1Hash = [1; 20];
    const CLIENT_ID: PeerId = [2; 20];
    const PEER_ID: PeerId = [3; 20];
    const PIECE_COUNT: usize = 8;

    struct Source {
        own: Bitfield,
        piece: Vec<u8>,
    }

    impl PieceReader for Source {
        fn own_pieces(&self) -> &Bitfield {
            &self.own
        }

        fn read_piece(&mut self, index: PieceIndex) -> std::result::Result<Vec<u8>, ReadError> {
            if self.own.get(index) {
                Ok(self.piece.clone())
            } else {
                Err(ReadError::MissingData)
            }
        }
    }

    fn source() -> Source {
        Source {
            own: Bitfield::repeat(true, PIECE_COUNT),
            piece: (0..(3 * BLOCK_LEN)).map(|i| i as u8).collect(),
        }
    }

    struct Harness {
        session: PeerSession,
        events: mpsc::UnboundedReceiver<(SessionId, PeerEvent)>,
        source: Source,
        peer: MessageParser,
        now: Instant,
    }

    impl Harness {
        /// An outbound session that went through both handshakes.
        fn connected() -> Self {
            let mut h = Self::new();
            let own = h.source.own.clone();
            h.session.on_connected(&own, h.now).unwrap();
            let mut buf = BytesMut::new();
            HandshakeCodec::new(INFO_HASH, PeerIdMatch::Any)
                .encode(Handshake::new(INFO_HASH, PEER_ID), &mut buf)
                .unwrap();
            h.receive_bytes(&buf);
            // drop our handshake and bitfield
            let out = h.session.take_outgoing().unwrap();
            h.session.on_written(out.len(), h.now).unwrap();
            let mut out = BytesMut::from(&out[..]);
            HandshakeCodec::new(INFO_HASH, PeerIdMatch::Any)
                .decode(&mut out)
                .unwrap()
                .unwrap();
            assert_eq!(h.peer.append(&out).unwrap().len(), 1);
            h
        }

        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let ctx = Arc::new(SessionContext {
                info_hash: INFO_HASH,
                client_id: CLIENT_ID,
                piece_count: PIECE_COUNT,
            });
            let now = Instant::now();
            let session = PeerSession::outbound(
                SessionId(0),
                PeerInfo::from("127.0.0.1:6881".parse::<std::net::SocketAddr>().unwrap()),
                ctx,
                SessionConf::from(&TorrentConf::default()),
                tx,
                now,
            );
            Self {
                session,
                events: rx,
                source: source(),
                peer: MessageParser::new(),
                now,
            }
        }

        fn receive_bytes(&mut self, data: &[u8]) {
            self.session.receive(data, &mut self.source, self.now).unwrap();
        }

        fn receive(&mut self, msg: Message) -> Result<()> {
            let mut buf = BytesMut::new();
            crate::peer::codec::PeerCodec.encode(msg, &mut buf).unwrap();
            self.session.receive(&buf, &mut self.source, self.now)
        }

        /// Messages the session sent since the last call, marked written.
        fn sent(&mut self) -> Vec<Message> {
            let Some(out) = self.session.take_outgoing() else {
                return Vec::new();
            };
            self.session.on_written(out.len(), self.now).unwrap();
            self.peer
                .append(&out)
                .unwrap()
                .into_iter()
                .map(|frame| Message::decode(frame).unwrap())
                .collect()
        }

        fn events(&mut self) -> Vec<PeerEvent> {
            let mut events = Vec::new();
            while let Ok((_, event)) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn requests(msgs: &[Message]) -> Vec<BlockInfo> {
        msgs.iter()
            .filter_map(|m| match m {
                Message::Request(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_outbound_handshake_sequence() {
        let mut h = Harness::new();
        assert_eq!(h.session.state().connection, ConnectionState::Connecting);
        let own = h.source.own.clone();
        h.session.on_connected(&own, h.now).unwrap();
        assert_eq!(h.session.state().connection, ConnectionState::Handshaking);

        let out = h.session.take_outgoing().unwrap();
        assert_eq!(out[0], 19);
        let mut buf = BytesMut::from(&out[..]);
        let handshake = HandshakeCodec::new(INFO_HASH, PeerIdMatch::Any)
            .decode(&mut buf)
            .unwrap()
            .unwrap();
        assert_eq!(handshake.peer_id, CLIENT_ID);
        let msgs: Vec<_> = h
            .peer
            .append(&buf)
            .unwrap()
            .into_iter()
            .map(|f| Message::decode(f).unwrap())
            .collect();
        assert_eq!(msgs, vec![Message::Bitfield(Bytes::from(own.to_bytes()))]);
    }

    #[test]
    fn test_inbound_answers_handshake() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(SessionContext {
            info_hash: INFO_HASH,
            client_id: CLIENT_ID,
            piece_count: PIECE_COUNT,
        });
        let now = Instant::now();
        let mut session = PeerSession::inbound(
            SessionId(1),
            PeerInfo::from("127.0.0.1:6881".parse::<std::net::SocketAddr>().unwrap()),
            ctx,
            SessionConf::from(&TorrentConf::default()),
            tx,
            now,
        );
        assert!(session.take_outgoing().is_none());

        let mut buf = BytesMut::new();
        HandshakeCodec::new(INFO_HASH, PeerIdMatch::Any)
            .encode(Handshake::new(INFO_HASH, PEER_ID), &mut buf)
            .unwrap();
        session.receive(&buf, &mut source(), now).unwrap();
        assert!(session.is_connected());
        assert_eq!(session.state().peer_id, Some(PEER_ID));
        // handshake plus bitfield
        assert_eq!(session.take_outgoing().unwrap().len(), 68 + 4 + 1 + 1);
    }

    #[test]
    fn test_wrong_info_hash_never_connects() {
        let mut h = Harness::new();
        let own = h.source.own.clone();
        h.session.on_connected(&own, h.now).unwrap();
        let mut buf = BytesMut::new();
        HandshakeCodec::new([9; 20], PeerIdMatch::Any)
            .encode(Handshake::new([9; 20], PEER_ID), &mut buf)
            .unwrap();
        assert!(h.session.receive(&buf, &mut h.source, h.now).is_err());
        assert!(!h.session.is_connected());
    }

    #[test]
    fn test_interested_sent_once() {
        let mut h = Harness::connected();
        h.session.download_piece(0, 3 * BLOCK_LEN).unwrap();
        h.session.download_piece(0, 3 * BLOCK_LEN).unwrap();
        h.session.download_piece(1, 3 * BLOCK_LEN).unwrap();
        assert_eq!(h.sent(), vec![Message::Interested]);
        assert!(h.session.state().am_interested);
        assert_eq!(h.session.download_count(), 2);
    }

    #[test]
    fn test_unchoke_on_interest() {
        let mut h = Harness::connected();
        h.receive(Message::Interested).unwrap();
        assert_eq!(h.sent(), vec![Message::Unchoke]);
        assert!(!h.session.state().am_choking);
        // no second unchoke
        h.receive(Message::Interested).unwrap();
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_request_window_bound() {
        let mut h = Harness::connected();
        let piece_len = 10 * BLOCK_LEN;
        h.session.download_piece(0, piece_len).unwrap();
        assert_eq!(h.sent(), vec![Message::Interested]);

        h.receive(Message::Unchoke).unwrap();
        let mut outstanding = requests(&h.sent());
        assert_eq!(outstanding.len(), 5);
        assert_eq!(outstanding[0], BlockInfo::new(0, 0, BLOCK_LEN));

        let mut received = 0;
        while let Some(block) = outstanding.first().copied() {
            outstanding.remove(0);
            h.receive(Message::Block {
                piece_index: 0,
                offset: block.offset,
                data: Bytes::from(vec![0; block.len as usize]),
            })
            .unwrap();
            received += 1;
            let new = requests(&h.sent());
            assert!(new.len() <= 1);
            outstanding.extend(new);
            assert!(h.session.pending_request_count() <= 5);
        }
        assert_eq!(received, 10);
        assert_eq!(
            h.events(),
            vec![PeerEvent::PieceDownloaded {
                index: 0,
                data: vec![0; piece_len as usize],
            }]
        );
        assert_eq!(h.session.download_count(), 0);
    }

    #[test]
    fn test_window_shared_between_pieces() {
        let mut h = Harness::connected();
        h.session.download_piece(0, 3 * BLOCK_LEN).unwrap();
        h.session.download_piece(1, 3 * BLOCK_LEN).unwrap();
        h.receive(Message::Unchoke).unwrap();
        let sent = requests(&h.sent());
        assert_eq!(sent.len(), 5);
        assert_eq!(sent.iter().filter(|b| b.piece_index == 0).count(), 3);
        assert_eq!(sent.iter().filter(|b| b.piece_index == 1).count(), 2);
    }

    #[test]
    fn test_choke_fails_download() {
        let mut h = Harness::connected();
        h.session.download_piece(3, 2 * BLOCK_LEN).unwrap();
        h.receive(Message::Unchoke).unwrap();
        h.sent();
        h.receive(Message::Choke).unwrap();
        assert_eq!(h.events(), vec![PeerEvent::PieceFailed { index: 3 }]);
        assert_eq!(h.session.download_count(), 0);
        // nothing is re-requested
        h.receive(Message::Unchoke).unwrap();
        assert!(requests(&h.sent()).is_empty());
    }

    #[test]
    fn test_cancel_download_sends_cancels() {
        let mut h = Harness::connected();
        h.session.download_piece(3, 2 * BLOCK_LEN).unwrap();
        h.receive(Message::Unchoke).unwrap();
        h.sent();
        h.session.cancel_download(3).unwrap();
        let cancels: Vec<_> = h
            .sent()
            .into_iter()
            .filter(|m| matches!(m, Message::Cancel(_)))
            .collect();
        assert_eq!(cancels.len(), 2);
        assert_eq!(h.events(), vec![PeerEvent::PieceFailed { index: 3 }]);
    }

    #[test]
    fn test_disconnect_fails_downloads() {
        let mut h = Harness::connected();
        h.session.download_piece(3, BLOCK_LEN).unwrap();
        h.session.download_piece(4, BLOCK_LEN).unwrap();
        h.session.disconnect().unwrap();
        let mut failed = h.events();
        failed.sort_by_key(|e| match e {
            PeerEvent::PieceFailed { index } => *index,
            _ => usize::MAX,
        });
        assert_eq!(
            failed,
            vec![
                PeerEvent::PieceFailed { index: 3 },
                PeerEvent::PieceFailed { index: 4 },
            ]
        );
    }

    #[test]
    fn test_uploads_one_block_at_a_time() {
        let mut h = Harness::connected();
        h.receive(Message::Interested).unwrap();
        h.sent();

        for i in 0..3 {
            h.receive(Message::Request(BlockInfo::new(2, i * BLOCK_LEN, BLOCK_LEN)))
                .unwrap();
        }
        // only the first block goes out until its write completes
        let out = h.session.take_outgoing().unwrap();
        let msgs: Vec<_> = h
            .peer
            .append(&out)
            .unwrap()
            .into_iter()
            .map(|f| Message::decode(f).unwrap())
            .collect();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], Message::Block { offset: 0, .. }));
        assert!(h.session.take_outgoing().is_none());

        h.session.on_written(out.len(), h.now).unwrap();
        let next = h.sent();
        assert!(matches!(next[..], [Message::Block { offset, .. }] if offset == BLOCK_LEN));
        let last = h.sent();
        match &last[..] {
            [Message::Block { offset, data, .. }] => {
                assert_eq!(*offset, 2 * BLOCK_LEN);
                assert_eq!(&data[..], &h.source.piece[2 * BLOCK_LEN as usize..]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.session.counters().uploaded.total(), 3 * BLOCK_LEN as u64);
    }

    #[test]
    fn test_cancelled_request_not_served() {
        let mut h = Harness::connected();
        h.receive(Message::Interested).unwrap();
        h.sent();
        let second = BlockInfo::new(2, BLOCK_LEN, BLOCK_LEN);
        h.receive(Message::Request(BlockInfo::new(2, 0, BLOCK_LEN))).unwrap();
        h.receive(Message::Request(second)).unwrap();
        h.receive(Message::Cancel(second)).unwrap();

        assert_eq!(h.sent().len(), 1);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_request_served_without_interest() {
        let mut h = Harness::connected();
        h.receive(Message::Request(BlockInfo::new(2, 0, BLOCK_LEN))).unwrap();
        match &h.sent()[..] {
            [Message::Block { piece_index, offset, data }] => {
                assert_eq!(*piece_index, 2);
                assert_eq!(*offset, 0);
                assert_eq!(&data[..], &h.source.piece[..BLOCK_LEN as usize]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_interested_clears_uploads() {
        let mut h = Harness::connected();
        h.receive(Message::Interested).unwrap();
        h.sent();
        h.receive(Message::Request(BlockInfo::new(2, 0, BLOCK_LEN))).unwrap();
        h.receive(Message::Request(BlockInfo::new(2, BLOCK_LEN, BLOCK_LEN)))
            .unwrap();
        h.receive(Message::NotInterested).unwrap();
        assert!(h.session.uploads.is_empty());

        // the block already handed over still goes out, nothing after it
        let sent = h.sent();
        assert!(matches!(sent[..], [Message::Block { offset: 0, .. }]));
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_disconnect_clears_uploads() {
        let mut h = Harness::connected();
        h.receive(Message::Request(BlockInfo::new(2, 0, BLOCK_LEN))).unwrap();
        h.receive(Message::Request(BlockInfo::new(3, 0, BLOCK_LEN))).unwrap();
        assert_eq!(h.session.uploads.len(), 2);

        h.session.disconnect().unwrap();
        assert!(h.session.uploads.is_empty());
        assert!(h.session.upload_in_flight.is_none());
        h.sent();
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_choking_peer_clears_uploads() {
        let mut h = Harness::connected();
        h.receive(Message::Interested).unwrap();
        h.sent();
        h.receive(Message::Request(BlockInfo::new(2, 0, BLOCK_LEN))).unwrap();
        h.receive(Message::Request(BlockInfo::new(2, BLOCK_LEN, BLOCK_LEN)))
            .unwrap();
        h.session.choke_peer().unwrap();
        let sent = h.sent();
        assert!(matches!(sent[..], [Message::Block { .. }, Message::Choke]));
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_invalid_requests_drop_peer() {
        let mut h = Harness::connected();
        h.receive(Message::Interested).unwrap();
        assert!(matches!(
            h.receive(Message::Request(BlockInfo::new(100, 0, BLOCK_LEN))),
            Err(PeerError::InvalidPieceIndex(100))
        ));
        assert!(matches!(
            h.receive(Message::Request(BlockInfo::new(2, 3 * BLOCK_LEN, 1))),
            Err(PeerError::InvalidBlockInfo)
        ));
        assert!(matches!(
            h.receive(Message::Have { piece_index: 8 }),
            Err(PeerError::InvalidPieceIndex(8))
        ));
    }

    #[test]
    fn test_have_and_bitfield_notify() {
        let mut h = Harness::connected();
        h.receive(Message::Have { piece_index: 1 }).unwrap();
        h.receive(Message::Have { piece_index: 1 }).unwrap();
        assert_eq!(h.events(), vec![PeerEvent::NewPiecesAvailable]);
        assert!(h.session.pieces().get(1));

        h.receive(Message::Bitfield(Bytes::from_static(&[0xff]))).unwrap();
        assert_eq!(h.events(), vec![PeerEvent::NewPiecesAvailable]);
        assert!(h.session.is_seed());

        // at the cap, no more notifications
        h.session.download_piece(0, BLOCK_LEN).unwrap();
        h.session.download_piece(1, BLOCK_LEN).unwrap();
        h.receive(Message::Bitfield(Bytes::from_static(&[0xff]))).unwrap();
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_bad_bitfield_size() {
        let mut h = Harness::connected();
        assert!(matches!(
            h.receive(Message::Bitfield(Bytes::from_static(&[0xff, 0]))),
            Err(PeerError::InvalidBitfield(_))
        ));
    }

    #[test]
    fn test_keep_alive_and_timeout() {
        let mut h = Harness::connected();
        let conf = SessionConf::from(&TorrentConf::default());

        h.session.tick(h.now + Duration::from_secs(1)).unwrap();
        assert!(h.sent().is_empty());

        h.session.tick(h.now + conf.keep_alive_interval).unwrap();
        assert_eq!(h.sent(), vec![Message::KeepAlive]);

        // a received keep-alive resets the liveness timer
        h.now += conf.keep_alive_interval;
        h.receive(Message::KeepAlive).unwrap();
        h.session.tick(h.now + Duration::from_secs(1)).unwrap();

        assert!(matches!(
            h.session.tick(h.now + conf.keep_alive_timeout),
            Err(PeerError::InactivityTimeout)
        ));
    }
}
