pub use tokio::{io::Error as IoError, sync::mpsc::error::SendError};

use crate::{error::bitfield::BitfieldError, PieceIndex};

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

/// The ways a peer's handshake may fail validation.
///
/// Each variant is reported as soon as the bytes it concerns have arrived,
/// without waiting for the rest of the handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake must have the string \"BitTorrent protocol\"")]
    /// The protocol length prefix or the protocol string is not that of
    /// the BitTorrent protocol.
    ProtocolMismatch,

    #[error("invalid info hash")]
    /// Peer's torrent info hash did not match ours.
    InfoHashMismatch,

    #[error("invalid peer id")]
    /// We expected a specific peer id and the peer presented another.
    PeerIdMismatch,

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<IoError> for HandshakeError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

/// A message frame that could not be turned into a protocol message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("unknown message id {0}")]
    /// The frame's id byte is not a message this client knows.
    UnknownId(u8),

    #[error("message {id} too short: {len} bytes")]
    /// The frame is shorter than the minimum for its message id.
    TooShort { id: u8, len: usize },

    #[error("frame of {0} bytes exceeds the limit")]
    /// The length prefix announces a frame we refuse to buffer.
    TooLong(usize),

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<IoError> for MessageError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("{0}")]
    /// The peer's handshake was invalid, the session is never promoted.
    Handshake(#[from] HandshakeError),

    #[error("malformed message: {0}")]
    /// The peer sent a frame we could not decode.
    Malformed(#[from] MessageError),

    #[error("invalid bitfield: {0}")]
    /// The advertised bitfield does not fit the torrent.
    InvalidBitfield(#[from] BitfieldError),

    #[error("channel error")]
    /// The channel on which some component in engine
    /// was listening or sending died.
    Channel,

    #[error("inactivity timeout")]
    /// Nothing was received from the peer within the keep-alive timeout.
    InactivityTimeout,

    #[error("invalid block info")]
    /// The block information the peer sent is invalid.
    InvalidBlockInfo,

    #[error("invalid piece index {0}")]
    /// The piece index the peer sent is out of the torrent's bounds.
    InvalidPieceIndex(PieceIndex),

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<IoError> for PeerError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for PeerError {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}
