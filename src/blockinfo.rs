use std::fmt;

use crate::{PieceIndex, BLOCK_LEN};

/// A block is a fixed size chunk of a piece, which in turn is a fixed size
/// chunk of a content. Downloading torrents happen at this block level
/// granularity.
///
/// The same triple identifies a `request` and a `cancel` on the wire, and
/// the header of a `piece` message, so it's compared structurally.
#[derive(
  Clone,
  Copy,
  Debug,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
)]
pub struct BlockInfo {
  /// The index of the piece of which this is a block.
  pub piece_index: PieceIndex,
  /// The zero-based byte offset into the piece.
  pub offset: u32,
  /// The block's length in bytes.
  /// Always 16 KiB (0x4000 bytes) or less, for downloads.
  pub len: u32,
}

impl BlockInfo {
  pub fn new(
    piece_index: PieceIndex,
    offset: u32,
    len: u32,
  ) -> Self {
    Self {
      piece_index,
      offset,
      len,
    }
  }

  /// The exclusive end offset of the block in its piece.
  pub fn end(&self) -> u64 {
    self.offset as u64 + self.len as u64
  }
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "(piece: {} offset: {} len: {})",
      self.piece_index, self.offset, self.len
    )
  }
}

/// Returns the length of the block at the index in pieces.
///
/// If the piece is not a multiple of the default block length,
/// the returned value is small.
///
/// # Panics
///
/// Panics if the index multiplied by the default block length would exceed the
/// piece length.
pub fn block_len(
  piece_len: u32,
  block_index: usize,
) -> u32 {
  let block_index = block_index as u32;
  let block_offset = block_index * BLOCK_LEN;
  assert!(piece_len > block_offset);
  std::cmp::min(piece_len - block_offset, BLOCK_LEN)
}

/// Returns the number of blocks in a piece of the given length.
pub fn block_count(piece_len: u32) -> usize {
  // all but the last piece are a multiple of the block length,
  // but the last piece may be shorter so we need to account for this
  // by rounding up before dividing to get the number of blocks in piece.
  (piece_len as usize + (BLOCK_LEN as usize - 1))
    / BLOCK_LEN as usize
}

/// Splits the piece into its 16 KiB blocks, in ascending offset order. The
/// last block holds the remainder.
pub fn partition(
  piece_index: PieceIndex,
  piece_len: u32,
) -> impl Iterator<Item = BlockInfo> {
  (0..block_count(piece_len)).map(move |i| BlockInfo {
    piece_index,
    offset: i as u32 * BLOCK_LEN,
    len: block_len(piece_len, i),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  // An arbitrary piece length that is an exact multiple of the canonical
  // block length (16 KiB).
  const BLOCK_LEN_MULTIPLE_PIECE_LEN: u32 =
    2 * BLOCK_LEN;

  // An arbitrary piece length that is _not_ a multiple of the canonical block
  // length and the amount with which it overlaps the nearest exact multiple
  // value.
  const OVERLAP: u32 = 234;
  const UNEVEN_PIECE_LEN: u32 =
    2 * BLOCK_LEN + OVERLAP;

  #[test]
  fn test_block_len() {
    assert_eq!(
      block_len(BLOCK_LEN_MULTIPLE_PIECE_LEN, 0),
      BLOCK_LEN
    );
    assert_eq!(
      block_len(BLOCK_LEN_MULTIPLE_PIECE_LEN, 1),
      BLOCK_LEN
    );

    assert_eq!(
      block_len(UNEVEN_PIECE_LEN, 0),
      BLOCK_LEN
    );
    assert_eq!(
      block_len(UNEVEN_PIECE_LEN, 2),
      OVERLAP
    );
  }

  #[test]
  #[should_panic]
  fn test_block_len_invalid_index_panic() {
    block_len(BLOCK_LEN_MULTIPLE_PIECE_LEN, 2);
  }

  #[test]
  fn test_block_count() {
    assert_eq!(
      block_count(BLOCK_LEN_MULTIPLE_PIECE_LEN),
      2
    );
    assert_eq!(block_count(UNEVEN_PIECE_LEN), 3);
    assert_eq!(block_count(1), 1);
  }

  #[test]
  fn test_partition_with_remainder() {
    let blocks: Vec<_> = partition(3, 40960).collect();
    assert_eq!(
      blocks,
      vec![
        BlockInfo::new(3, 0, 16384),
        BlockInfo::new(3, 16384, 16384),
        BlockInfo::new(3, 32768, 8192),
      ]
    );
  }
}
