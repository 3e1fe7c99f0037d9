//! Piece storage.
//!
//! The swarm never touches storage directly: the progress collaborator
//! writes verified pieces through a [`PieceStore`] and reads them back when
//! serving other peers.

use crate::{
    error::disk::{ReadError, WriteError},
    PieceIndex,
};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Whole-piece storage. Failures are scoped to the piece in question.
pub trait PieceStore {
    fn read_piece(&mut self, index: PieceIndex) -> Result<Vec<u8>, ReadError>;

    fn write_piece(&mut self, index: PieceIndex, data: &[u8]) -> Result<(), WriteError>;
}

/// Piece geometry shared by the stores: every piece is `piece_len` bytes
/// long except the last, which holds the remainder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PieceLayout {
    pub piece_len: u32,
    pub total_len: u64,
}

impl PieceLayout {
    pub fn new(piece_len: u32, total_len: u64) -> Self {
        debug_assert!(piece_len > 0);
        Self {
            piece_len,
            total_len,
        }
    }

    pub fn piece_count(&self) -> usize {
        ((self.total_len + self.piece_len as u64 - 1) / self.piece_len as u64) as usize
    }

    /// The length of the piece, or `None` if the index is out of bounds.
    pub fn piece_len(&self, index: PieceIndex) -> Option<u32> {
        let offset = self.offset(index);
        if offset >= self.total_len {
            return None;
        }
        Some((self.total_len - offset).min(self.piece_len as u64) as u32)
    }

    /// The byte offset of the piece within the torrent.
    pub fn offset(&self, index: PieceIndex) -> u64 {
        index as u64 * self.piece_len as u64
    }

    fn check_write(&self, index: PieceIndex, data: &[u8]) -> Result<(), WriteError> {
        let expected = self.piece_len(index).ok_or(WriteError::InvalidPieceIndex)? as usize;
        if data.len() != expected {
            return Err(WriteError::InvalidPieceLen {
                expected,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_last_piece_is_remainder() {
        let layout = PieceLayout::new(10, 25);
        assert_eq!(layout.piece_count(), 3);
        assert_eq!(layout.piece_len(0), Some(10));
        assert_eq!(layout.piece_len(2), Some(5));
        assert_eq!(layout.piece_len(3), None);
        assert_eq!(layout.offset(2), 20);
    }

    #[test]
    fn test_layout_exact_multiple() {
        let layout = PieceLayout::new(10, 30);
        assert_eq!(layout.piece_count(), 3);
        assert_eq!(layout.piece_len(2), Some(10));
    }
}
