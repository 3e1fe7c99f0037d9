#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BitfieldError {
    #[error("bitfield must be {expected} bytes long, got {actual}")]
    /// The raw bitfield does not hold exactly the number of bytes required
    /// for the torrent's piece count.
    SizeMismatch { expected: usize, actual: usize },
}
