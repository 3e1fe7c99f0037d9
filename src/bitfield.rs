//! The piece availability vector exchanged between peers and persisted as
//! resume data.

use bitvec::prelude::{BitVec, Msb0};

use crate::{error::bitfield::BitfieldError, PieceIndex};

/// The bitfield represents the piece availability of a peer (or of ourselves).
///
/// It is a compact bool vector of most significant bits to least significant
/// bits, that is, where the first highest bit represents the first piece, the
/// second highest element the second piece, and so on (e.g. `0b1100_0001`
/// would mean that we have pieces 0, 1, and 7).
///
/// The number of pieces is fixed at construction and never changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitfield {
    bits: BitVec<u8, Msb0>,
}

impl Bitfield {
    /// Creates a bitfield of `piece_count` pieces, none of which are set.
    pub fn new(piece_count: usize) -> Self {
        Self::repeat(false, piece_count)
    }

    /// Creates a bitfield of `piece_count` pieces all set to `value`.
    pub fn repeat(value: bool, piece_count: usize) -> Self {
        Self {
            bits: BitVec::repeat(value, piece_count),
        }
    }

    /// Parses the raw wire (or resume file) representation.
    ///
    /// The byte count must be exactly the one needed to hold `piece_count`
    /// bits. Any spare bits in the last byte are cleared.
    pub fn from_bytes(
        bytes: &[u8],
        piece_count: usize,
    ) -> Result<Self, BitfieldError> {
        let expected = byte_count(piece_count);
        if bytes.len() != expected {
            return Err(BitfieldError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let mut bits = BitVec::<u8, Msb0>::from_slice(bytes);
        bits.truncate(piece_count);
        Ok(Self { bits })
    }

    /// Returns the MSB-first packed representation, with the unused trailing
    /// bits of the last byte zeroed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bits = self.bits.clone();
        // bits past `len` in the backing store are unspecified, so we must
        // explicitly clear them before handing the raw bytes out
        bits.set_uninitialized(false);
        bits.into_vec()
    }

    /// Sets the availability of the piece at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: PieceIndex, value: bool) {
        self.bits.set(index, value);
    }

    /// Returns whether the piece at `index` is available. Out of bounds
    /// indices are never available.
    pub fn get(&self, index: PieceIndex) -> bool {
        self.bits.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Returns true if every piece is available.
    pub fn is_complete(&self) -> bool {
        self.bits.all()
    }

    /// Returns true if no piece is available.
    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// The number of available pieces.
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// The ratio of available pieces to all pieces, in `[0, 1]`.
    pub fn fraction_set(&self) -> f64 {
        if self.bits.is_empty() {
            return 0.0;
        }
        self.count_ones() as f64 / self.bits.len() as f64
    }

    /// The number of pieces this bitfield describes.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Iterates over the indices of the available pieces.
    pub fn iter_ones(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        self.bits.iter_ones()
    }
}

/// Returns the number of bytes the wire representation of a bitfield of
/// `piece_count` pieces takes.
pub fn byte_count(piece_count: usize) -> usize {
    (piece_count + 7) / 8
}
