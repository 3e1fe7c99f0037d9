//! This module defines the alerts the API user may receive from a torrent.
//!
//! Communication of such alerts is performed via unbounded
//! [tokio::sync::mpsc] channels, so the application embedding the crate may
//! be driven partially or entirely by these alerts. Peer discovery is one
//! example: the torrent never talks to trackers itself, it raises
//! [`Alert::NeedMorePeers`] and expects the application to answer with
//! fresh peers.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    error::TorrentError,
    torrent::stats::{TorrentStats, TransferTotals},
    PieceIndex, TorrentId,
};

/// The channel on which alerts are sent to the user.
pub type AlertSender = UnboundedSender<Alert>;
/// The channel on which the user receives alerts.
pub type AlertReceiver = UnboundedReceiver<Alert>;

#[derive(Debug)]
pub enum Alert {
    /// The torrent holds fewer peers than its configured minimum and has no
    /// candidates left to connect to. The totals are what an announce to a
    /// tracker would report.
    NeedMorePeers {
        id: TorrentId,
        totals: TransferTotals,
    },
    /// A piece was downloaded, verified and stored.
    PieceCompleted { id: TorrentId, index: PieceIndex },
    /// Every piece of the torrent is available locally.
    TorrentComplete(TorrentId),
    /// A snapshot of the torrent's state, sent on request.
    TorrentStats {
        id: TorrentId,
        stats: Box<TorrentStats>,
    },
    /// A non-fatal error, e.g. a piece that could not be committed.
    Error { id: TorrentId, error: TorrentError },
}
