use crate::PeerId;

/// Who initiated the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// At any given time, a connection with a peer is in one of the below states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// The peer connection has not yet been connected or it had been connected
    /// before but has been stopped.
    #[default]
    Disconnected,
    /// The state during which the TCP connection is established.
    Connecting,
    /// The transport is up and the handshakes are being exchanged.
    Handshaking,
    /// Both handshakes are done, regular messages flow.
    Connected,
}

/// The choke and interest flags of both sides plus what the handshake told
/// us about the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub connection: ConnectionState,
    /// If we're choked, peer doesn't allow us to download pieces from them.
    pub peer_choking: bool,
    /// If we're interested, peer has pieces that we don't have.
    pub am_interested: bool,
    /// If peer is choked, we don't allow them to download pieces from us.
    pub am_choking: bool,
    /// If peer is interested in us, they mean to download pieces that we have.
    pub peer_interested: bool,
    /// The id from the peer's handshake.
    pub peer_id: Option<PeerId>,
    /// Whether the peer's handshake advertised DHT support.
    pub dht: bool,
}

impl Default for SessionState {
    /// By default, both sides of the connection start off as choked and not
    /// interested in the other.
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            peer_choking: true,
            am_interested: false,
            am_choking: true,
            peer_interested: false,
            peer_id: None,
            dht: false,
        }
    }
}
