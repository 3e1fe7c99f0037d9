/// The byte totals a tracker announce reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    /// How many more peers the torrent could take.
    pub peers_wanted: usize,
}

/// Aggregate statistics of a torrent's swarm.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TorrentStats {
    /// Sessions past the handshake.
    pub connected_count: usize,
    /// Connected peers that have every piece.
    pub seed_count: usize,
    /// All sessions, including the ones still connecting.
    pub session_count: usize,
    /// Addresses not yet connected to.
    pub candidate_count: usize,
    pub piece_count: usize,
    pub pieces_have: usize,
    /// Bytes per second, over the last second.
    pub upload_rate: u64,
    pub download_rate: u64,
    /// Lifetime totals, including peers no longer connected.
    pub uploaded: u64,
    pub downloaded: u64,
}
