use std::net::IpAddr;

use crate::{torrent::stats::TransferTotals, PeerId, Sha1Hash};

/// The query of an HTTP announce.
///
/// [`Field meanings`](http://bittorrent.org/beps/bep_0003.html#trackers)
#[derive(Clone, Debug)]
pub struct Announce {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
    /// The port we accept peer connections on.
    pub port: u16,
    /// Only needed when we reach the tracker through a proxy.
    pub ip: Option<IpAddr>,
    pub downloaded: u64,
    pub uploaded: u64,
    pub left: u64,
    /// How many peers we'd like. Left to the tracker if `None`.
    pub peer_count: Option<usize>,
    /// Echoed back if a previous response carried one.
    pub tracker_id: Option<String>,
    pub event: Option<Event>,
}

impl Announce {
    /// An announce reporting the swarm's lifetime transfer totals.
    pub fn from_totals(
        info_hash: Sha1Hash,
        peer_id: PeerId,
        port: u16,
        totals: TransferTotals,
    ) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            ip: None,
            downloaded: totals.downloaded,
            uploaded: totals.uploaded,
            left: totals.left,
            peer_count: (totals.peers_wanted > 0).then_some(totals.peers_wanted),
            tracker_id: None,
            event: None,
        }
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }
}

/// Sent on the announces at lifecycle changes. Periodic ones carry none.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Started,
    /// Only when a download finishes, never if we started as a seed.
    Completed,
    Stopped,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}
