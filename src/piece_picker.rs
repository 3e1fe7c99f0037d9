//! Deciding which piece to download next and committing finished pieces.

use std::collections::HashSet;

use rand::seq::IteratorRandom;
use sha1::{Digest, Sha1};

use crate::{
    conf::TorrentConf,
    disk::{PieceLayout, PieceStore},
    error::disk::{PieceError, ReadError},
    resume::ResumeFile,
    Bitfield, PieceIndex, Sha1Hash,
};

/// A piece handed out for download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PieceRequest {
    pub index: PieceIndex,
    pub len: u32,
    pub hash: Sha1Hash,
}

/// What a peer session needs in order to serve uploads.
pub trait PieceReader {
    /// The pieces we have.
    fn own_pieces(&self) -> &Bitfield;

    fn read_piece(&mut self, index: PieceIndex) -> Result<Vec<u8>, ReadError>;
}

/// Keeps track of what we have and what is being downloaded.
pub trait Progress: PieceReader {
    /// Hands out a piece the peer has and which nobody is downloading yet.
    fn next_piece(&mut self, available: &Bitfield) -> Option<PieceRequest>;

    /// Accepts a downloaded piece. On error the piece is back in the pool.
    fn mark_downloaded(&mut self, index: PieceIndex, data: Vec<u8>) -> Result<(), PieceError>;

    /// The download of the piece was abandoned.
    fn mark_lost(&mut self, index: PieceIndex);

    /// Bytes still missing.
    fn left(&self) -> u64;
}

/// The default [`Progress`]: picks a random eligible piece, verifies
/// finished pieces against their SHA-1 hash and writes them to a
/// [`PieceStore`].
pub struct PiecePicker<S> {
    own_pieces: Bitfield,
    in_progress: HashSet<PieceIndex>,
    hashes: Vec<Sha1Hash>,
    layout: PieceLayout,
    store: S,
    resume: Option<ResumeFile>,
}

impl<S: PieceStore> PiecePicker<S> {
    /// `piece_hashes` is the concatenation of every piece's hash, as found
    /// in a metainfo file.
    pub fn new(piece_hashes: &[u8], layout: PieceLayout, store: S) -> Self {
        let hashes: Vec<Sha1Hash> = piece_hashes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();
        debug_assert_eq!(hashes.len(), layout.piece_count());
        Self {
            own_pieces: Bitfield::new(hashes.len()),
            in_progress: HashSet::new(),
            hashes,
            layout,
            store,
            resume: None,
        }
    }

    /// Restores saved progress, if any, and saves progress to the file from
    /// now on.
    pub fn with_resume(mut self, resume: ResumeFile) -> Self {
        if let Some(pieces) = resume.load(self.hashes.len()) {
            log::info!(
                "Resuming with {}/{} pieces from {:?}",
                pieces.count_ones(),
                pieces.len(),
                resume.path()
            );
            self.own_pieces = pieces;
        }
        self.resume = Some(resume);
        self
    }

    /// Resumes from the configured resume directory, if there is one.
    pub fn with_conf(self, conf: &TorrentConf, info_hash: &Sha1Hash) -> Self {
        match &conf.resume_dir {
            Some(dir) => self.with_resume(ResumeFile::new(dir, info_hash)),
            None => self,
        }
    }

    /// Starts out with every piece, for seeding.
    pub fn complete(mut self) -> Self {
        self.own_pieces = Bitfield::repeat(true, self.hashes.len());
        self
    }

    pub fn piece_count(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_in_progress(&self, index: PieceIndex) -> bool {
        self.in_progress.contains(&index)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: PieceStore> PieceReader for PiecePicker<S> {
    fn own_pieces(&self) -> &Bitfield {
        &self.own_pieces
    }

    fn read_piece(&mut self, index: PieceIndex) -> Result<Vec<u8>, ReadError> {
        if index >= self.hashes.len() {
            return Err(ReadError::InvalidPieceIndex);
        }
        if !self.own_pieces.get(index) {
            return Err(ReadError::MissingData);
        }
        self.store.read_piece(index)
    }
}

impl<S: PieceStore> Progress for PiecePicker<S> {
    fn next_piece(&mut self, available: &Bitfield) -> Option<PieceRequest> {
        let index = available
            .iter_ones()
            .filter(|&i| {
                i < self.hashes.len()
                    && !self.own_pieces.get(i)
                    && !self.in_progress.contains(&i)
            })
            .choose(&mut rand::thread_rng())?;
        let len = self.layout.piece_len(index)?;
        self.in_progress.insert(index);
        log::debug!("Picked piece {}", index);
        Some(PieceRequest {
            index,
            len,
            hash: self.hashes[index],
        })
    }

    fn mark_downloaded(&mut self, index: PieceIndex, data: Vec<u8>) -> Result<(), PieceError> {
        if !self.in_progress.remove(&index) {
            return Err(PieceError::NotInProgress(index));
        }

        let digest = Sha1::digest(&data);
        if digest.as_slice() != &self.hashes[index][..] {
            log::warn!("Piece {} failed hash check", index);
            return Err(PieceError::HashMismatch(index));
        }

        self.store.write_piece(index, &data)?;
        self.own_pieces.set(index, true);
        log::debug!(
            "Stored piece {} ({}/{})",
            index,
            self.own_pieces.count_ones(),
            self.own_pieces.len()
        );

        if let Some(resume) = &self.resume {
            if let Err(e) = resume.save(&self.own_pieces) {
                log::warn!("Failed to save resume data: {}", e);
            }
        }
        Ok(())
    }

    fn mark_lost(&mut self, index: PieceIndex) {
        if self.in_progress.remove(&index) {
            log::debug!("Piece {} returned to the pool", index);
        }
    }

    fn left(&self) -> u64 {
        (0..self.hashes.len())
            .filter(|&i| !self.own_pieces.get(i))
            .filter_map(|i| self.layout.piece_len(i))
            .map(u64::from)
            .sum()
    }
}
