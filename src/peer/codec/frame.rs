use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::peer::MessageError;

/// The byte length of the big-endian length prefix of every frame.
pub const PREFIX_LEN: usize = 4;

/// The largest frame body we buffer. Large enough for a bitfield of a few
/// million pieces or a generously sized block.
pub const MAX_FRAME_LEN: usize = 1 << 21;

/// Splits the post-handshake byte stream into frames along their 4 byte
/// length prefix.
///
/// A decoded frame is the body following the prefix: the message id and its
/// payload. An empty frame is a keep-alive.
#[derive(Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = MessageError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, MessageError> {
        if buf.len() < PREFIX_LEN {
            return Ok(None);
        }

        // peek at the length prefix without consuming it, we may have to
        // wait for the rest of the frame
        let mut tmp_buf = Cursor::new(&buf[..PREFIX_LEN]);
        let body_len = tmp_buf.get_u32() as usize;
        if body_len > MAX_FRAME_LEN {
            return Err(MessageError::TooLong(body_len));
        }

        if buf.len() < PREFIX_LEN + body_len {
            buf.reserve(PREFIX_LEN + body_len - buf.len());
            return Ok(None);
        }

        buf.advance(PREFIX_LEN);
        Ok(Some(buf.split_to(body_len).freeze()))
    }
}

/// Buffers incoming bytes and hands out every frame completed by an append.
///
/// The frames produced do not depend on how the stream was chunked.
#[derive(Default)]
pub struct MessageParser {
    codec: FrameCodec,
    buf: BytesMut,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and returns the frames it completed, in stream order.
    pub fn append(&mut self, data: &[u8]) -> Result<Vec<Bytes>, MessageError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode(&mut self.buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// The number of bytes buffered towards the next frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
