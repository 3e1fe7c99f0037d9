use std::{net::SocketAddr, time::Duration};

use serde_derive::Deserialize;

use super::{deserialize_peers, deserialize_seconds};
use crate::peer::PeerInfo;

#[derive(Debug, Default, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Response {
    /// Must be sent with every later announce if set.
    #[serde(default, rename = "tracker id")]
    pub tracker_id: Option<String>,

    /// When set, nothing else in the response is valid.
    #[serde(default, rename = "failure reason")]
    pub failure_reason: Option<String>,

    #[serde(default, rename = "warning message")]
    pub warning_message: Option<String>,

    /// How long to wait before the next periodic announce.
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub interval: Option<Duration>,

    #[serde(default, rename = "min interval", deserialize_with = "deserialize_seconds")]
    pub min_interval: Option<Duration>,

    #[serde(default, rename = "complete")]
    pub seeder_count: Option<usize>,
    #[serde(default, rename = "incomplete")]
    pub leecher_count: Option<usize>,

    #[serde(default, deserialize_with = "deserialize_peers")]
    pub peers: Vec<SocketAddr>,
}

impl Response {
    /// The returned peers, ready for [`Command::AddPeers`](crate::torrent::Command).
    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        self.peers.iter().copied().map(PeerInfo::from).collect()
    }
}
