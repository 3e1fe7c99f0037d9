use std::collections::HashMap;

use crate::{
    error::disk::{ReadError, WriteError},
    PieceIndex,
};

use super::{PieceLayout, PieceStore};

/// Keeps pieces in memory. Handy for seeding small payloads and for tests.
#[derive(Debug)]
pub struct MemoryStore {
    layout: PieceLayout,
    pieces: HashMap<PieceIndex, Vec<u8>>,
}

impl MemoryStore {
    pub fn new(layout: PieceLayout) -> Self {
        Self {
            layout,
            pieces: HashMap::new(),
        }
    }

    /// Splits a complete payload into its pieces.
    pub fn with_content(piece_len: u32, content: &[u8]) -> Self {
        let layout = PieceLayout::new(piece_len, content.len() as u64);
        let pieces = content
            .chunks(piece_len as usize)
            .enumerate()
            .map(|(i, chunk)| (i, chunk.to_vec()))
            .collect();
        Self { layout, pieces }
    }

    pub fn layout(&self) -> PieceLayout {
        self.layout
    }
}

impl PieceStore for MemoryStore {
    fn read_piece(&mut self, index: PieceIndex) -> Result<Vec<u8>, ReadError> {
        if self.layout.piece_len(index).is_none() {
            return Err(ReadError::InvalidPieceIndex);
        }
        self.pieces.get(&index).cloned().ok_or(ReadError::MissingData)
    }

    fn write_piece(&mut self, index: PieceIndex, data: &[u8]) -> Result<(), WriteError> {
        self.layout.check_write(index, data)?;
        self.pieces.insert(index, data.to_vec());
        Ok(())
    }
}
