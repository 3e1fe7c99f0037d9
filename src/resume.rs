//! Persists the local bitfield between runs.
//!
//! The bitfield is written as its raw wire bytes to `<hex info hash>.resume`
//! in the configured directory.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use crate::{Bitfield, Sha1Hash};

pub struct ResumeFile {
    path: PathBuf,
}

impl ResumeFile {
    pub fn new(dir: &Path, info_hash: &Sha1Hash) -> Self {
        Self {
            path: dir.join(file_name(info_hash)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, pieces: &Bitfield) -> io::Result<()> {
        fs::write(&self.path, pieces.to_bytes())
    }

    /// Loads the saved bitfield. A missing or unreadable file, or one that
    /// doesn't fit `piece_count`, means there's no saved progress.
    pub fn load(&self, piece_count: usize) -> Option<Bitfield> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Cannot read resume file {:?}: {}", self.path, e);
                }
                return None;
            }
        };
        match Bitfield::from_bytes(&bytes, piece_count) {
            Ok(pieces) => Some(pieces),
            Err(e) => {
                log::warn!("Ignoring resume file {:?}: {}", self.path, e);
                None
            }
        }
    }
}

/// The file name is derived from the info hash, which may hold any byte,
/// so it's hex encoded.
pub fn file_name(info_hash: &Sha1Hash) -> String {
    format!("{}.resume", hex::encode(info_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_name_is_hex() {
        let mut info_hash = [0; 20];
        info_hash[0] = 0xab;
        info_hash[19] = b'/';
        assert_eq!(
            file_name(&info_hash),
            "ab0000000000000000000000000000000000002f.resume"
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let resume = ResumeFile::new(dir.path(), &[3; 20]);
        let mut pieces = Bitfield::new(10);
        pieces.set(0, true);
        pieces.set(9, true);
        resume.save(&pieces).unwrap();

        assert_eq!(resume.load(10), Some(pieces));
    }

    #[test]
    fn test_missing_or_mismatched_file_is_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let resume = ResumeFile::new(dir.path(), &[3; 20]);
        assert_eq!(resume.load(10), None);

        resume.save(&Bitfield::new(10)).unwrap();
        assert_eq!(resume.load(100), None);
    }
}
