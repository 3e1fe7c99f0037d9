//! Everything that concerns a single remote peer: the wire codecs, the
//! sans-IO session state machine and the tokio tasks moving its bytes.

use std::{fmt, net::SocketAddr};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{PeerId, PieceIndex};

#[macro_use]
mod peer_log;

pub mod codec;
pub mod communicator;
pub mod connection;
pub mod piece;
pub mod session;
mod state;

pub use session::PeerSession;
pub use state::{ConnectionState, Direction, SessionState};

/// Identifies a session within its torrent's session table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a peer is known before (and after) connecting to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    /// Present when discovery told us the peer's id, in which case the
    /// handshake must carry exactly this id.
    pub id: Option<PeerId>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr, id: Option<PeerId>) -> Self {
        Self { addr, id }
    }
}

impl From<SocketAddr> for PeerInfo {
    fn from(addr: SocketAddr) -> Self {
        Self { addr, id: None }
    }
}

/// What a session reports to its torrent.
#[derive(Debug, PartialEq)]
pub enum PeerEvent {
    /// The peer advertised pieces and the session may take on another
    /// download.
    NewPiecesAvailable,
    /// All blocks of the piece arrived. The data is not verified yet.
    PieceDownloaded { index: PieceIndex, data: Vec<u8> },
    /// The download of the piece was abandoned and it may be handed to
    /// another peer.
    PieceFailed { index: PieceIndex },
}

/// The channel on which sessions post their events, tagged with their id.
pub type EventSender = UnboundedSender<(SessionId, PeerEvent)>;
pub type EventReceiver = UnboundedReceiver<(SessionId, PeerEvent)>;
