//! Set of module Error
pub mod bitfield;
pub mod disk;
pub mod peer;
pub mod torrent;
pub mod tracker;

pub use bitfield::BitfieldError;
pub use disk::{PieceError, ReadError, WriteError};
pub use peer::{HandshakeError, MessageError, PeerError};
pub use torrent::TorrentError;
pub use tracker::TrackerError;
