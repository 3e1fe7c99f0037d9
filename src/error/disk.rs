use crate::PieceIndex;

/// Error type returned on failed piece writes.
///
/// This error is non-fatal so it should not tear down anything but the
/// transfer of the piece in question.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("invalid piece index")]
    /// The piece index is out of the torrent's bounds.
    InvalidPieceIndex,

    #[error("piece length mismatch: expected {expected}, got {actual}")]
    /// The piece data does not have the length the torrent dictates.
    InvalidPieceLen { expected: usize, actual: usize },

    #[error("{0}")]
    /// An IO error ocurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for WriteError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error type returned on failed piece reads.
///
/// This error is non-fatal so it should not tear down anything but the
/// transfer of the piece in question.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("invalid piece index")]
    /// The piece index is out of the torrent's bounds.
    InvalidPieceIndex,

    #[error("torrent data missing")]
    /// The piece is valid within torrent but its data has not been downloaded
    /// yet or has been deleted.
    MissingData,

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error type returned when a downloaded piece cannot be accepted.
#[derive(Debug, thiserror::Error)]
pub enum PieceError {
    #[error("piece {0} was not being downloaded")]
    /// The piece was never handed out, or was already lost or stored.
    NotInProgress(PieceIndex),

    #[error("piece {0} failed hash check")]
    /// The assembled piece does not match its SHA-1 hash.
    HashMismatch(PieceIndex),

    #[error("{0}")]
    /// The storage collaborator failed to persist the piece.
    Write(#[from] WriteError),
}
