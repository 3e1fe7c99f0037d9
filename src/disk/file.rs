use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::{
    error::disk::{ReadError, WriteError},
    PieceIndex,
};

use super::{PieceLayout, PieceStore};

/// Stores the torrent as one contiguous file, piece `i` at offset
/// `i * piece_len`.
pub struct FileStore {
    layout: PieceLayout,
    handle: File,
}

impl FileStore {
    /// Opens the file in create, read, and write modes and sizes it to the
    /// torrent's length. Existing content is kept.
    pub fn new(path: &Path, layout: PieceLayout) -> std::io::Result<Self> {
        log::trace!("Opening and creating file {:?}", path);
        let handle = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)
            .map_err(|e| {
                log::warn!("Failed to open file {:?}", path);
                e
            })?;
        handle.set_len(layout.total_len)?;
        Ok(Self { layout, handle })
    }
}

impl PieceStore for FileStore {
    fn read_piece(&mut self, index: PieceIndex) -> Result<Vec<u8>, ReadError> {
        let len = self
            .layout
            .piece_len(index)
            .ok_or(ReadError::InvalidPieceIndex)?;
        let mut buf = vec![0; len as usize];
        self.handle.seek(SeekFrom::Start(self.layout.offset(index)))?;
        self.handle.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_piece(&mut self, index: PieceIndex, data: &[u8]) -> Result<(), WriteError> {
        self.layout.check_write(index, data)?;
        self.handle.seek(SeekFrom::Start(self.layout.offset(index)))?;
        self.handle.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pieces_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content");
        let mut store = FileStore::new(&path, PieceLayout::new(4, 10)).unwrap();

        store.write_piece(2, &[9, 9]).unwrap();
        store.write_piece(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(store.read_piece(2).unwrap(), vec![9, 9]);
        assert_eq!(store.read_piece(0).unwrap(), vec![1, 2, 3, 4]);

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, vec![1, 2, 3, 4, 0, 0, 0, 0, 9, 9]);
    }

    #[test]
    fn test_invalid_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            FileStore::new(&dir.path().join("content"), PieceLayout::new(4, 10)).unwrap();
        assert!(matches!(store.read_piece(3), Err(ReadError::InvalidPieceIndex)));
        assert!(matches!(
            store.write_piece(3, &[0]),
            Err(WriteError::InvalidPieceIndex)
        ));
    }
}
