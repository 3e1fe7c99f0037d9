use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::{blockinfo::BlockInfo, error::peer::MessageError, PieceIndex};

/// The ID of a message, which is included as a prefix in most messages.
///
/// The handshake and keep alive messages don't have explicit IDs.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Block = 7,
    Cancel = 8,
    Port = 9,
}

impl MessageId {
    /// Returns the header length of the specific message type, length prefix
    /// included. For all but the bitfield and block messages this is the
    /// whole message.
    #[inline(always)]
    pub fn header_len(&self) -> usize {
        4 + 1 + self.min_payload_len()
    }

    /// The fewest payload bytes (after the id) a frame of this id must carry.
    pub fn min_payload_len(&self) -> usize {
        match self {
            MessageId::Choke
            | MessageId::Unchoke
            | MessageId::Interested
            | MessageId::NotInterested
            | MessageId::Bitfield => 0,
            MessageId::Have => 4,
            MessageId::Request | MessageId::Cancel => 3 * 4,
            MessageId::Block => 2 * 4,
            MessageId::Port => 2,
        }
    }
}

impl TryFrom<u8> for MessageId {
    type Error = MessageError;

    fn try_from(k: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        Ok(match k {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Block,
            8 => Cancel,
            9 => Port,
            k => return Err(MessageError::UnknownId(k)),
        })
    }
}

/// The actual message exchanged by peers.
///
/// The bitfield is kept as raw bytes here, since its validity depends on the
/// torrent's piece count which the codec doesn't know.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    KeepAlive,
    Bitfield(Bytes),
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    Request(BlockInfo),
    Block {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    Cancel(BlockInfo),
    /// The peer's DHT port. Decoded but never acted upon or sent.
    Port(u16),
}

impl Message {
    /// Returns the ID of the message, if it has one  (e.g. keep alive doesn't).
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Bitfield(_) => Some(MessageId::Bitfield),
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Request(_) => Some(MessageId::Request),
            Message::Block { .. } => Some(MessageId::Block),
            Message::Cancel(_) => Some(MessageId::Cancel),
            Message::Port(_) => Some(MessageId::Port),
        }
    }

    /// Decodes a frame body as produced by
    /// [`FrameCodec`](super::frame::FrameCodec).
    ///
    /// Payload bytes beyond what the message id needs are ignored, except for
    /// the bitfield and block messages whose payload is open ended.
    pub fn decode(mut frame: Bytes) -> Result<Self, MessageError> {
        if frame.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(frame[0])?;
        if frame.len() - 1 < id.min_payload_len() {
            return Err(MessageError::TooShort {
                id: id as u8,
                len: frame.len(),
            });
        }
        frame.advance(1);

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => Message::Have {
                piece_index: frame.get_u32() as PieceIndex,
            },
            MessageId::Bitfield => Message::Bitfield(frame),
            MessageId::Request => Message::Request(BlockInfo::decode(&mut frame)),
            MessageId::Block => {
                let piece_index = frame.get_u32() as PieceIndex;
                let offset = frame.get_u32();
                Message::Block {
                    piece_index,
                    offset,
                    data: frame,
                }
            }
            MessageId::Cancel => Message::Cancel(BlockInfo::decode(&mut frame)),
            MessageId::Port => Message::Port(frame.get_u16()),
        };
        Ok(msg)
    }
}

impl BlockInfo {
    /// Encode the block info in the network binary protocol's format
    /// into the given buffer.
    pub fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        buf.put_u32(encode_index(self.piece_index)?);
        buf.put_u32(self.offset);
        buf.put_u32(self.len);
        Ok(())
    }

    /// Reads the `<index><offset><len>` triple. The caller makes sure there
    /// are at least 12 bytes.
    fn decode(buf: &mut Bytes) -> Self {
        let piece_index = buf.get_u32() as PieceIndex;
        let offset = buf.get_u32();
        let len = buf.get_u32();
        BlockInfo::new(piece_index, offset, len)
    }
}

fn encode_index(index: PieceIndex) -> io::Result<u32> {
    index
        .try_into()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Encodes protocol messages into length prefixed frames.
#[derive(Default)]
pub struct PeerCodec;

impl Encoder<Message> for PeerCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> io::Result<()> {
        let Some(id) = msg.id() else {
            // keep-alive is a bare zero length prefix
            buf.put_u32(0);
            return Ok(());
        };

        let extra_len = match &msg {
            Message::Bitfield(bitfield) => bitfield.len(),
            Message::Block { data, .. } => data.len(),
            _ => 0,
        };
        let msg_len = id.header_len() - 4 + extra_len;
        buf.reserve(4 + msg_len);
        buf.put_u32(msg_len as u32);
        buf.put_u8(id as u8);

        match msg {
            Message::Bitfield(bitfield) => buf.extend_from_slice(&bitfield),
            Message::Have { piece_index } => {
                buf.put_u32(encode_index(piece_index)?);
            }
            Message::Request(block) | Message::Cancel(block) => {
                block.encode(buf)?;
            }
            Message::Block {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32(encode_index(piece_index)?);
                buf.put_u32(offset);
                buf.extend_from_slice(&data);
            }
            Message::Port(port) => buf.put_u16(port),
            _ => (),
        }
        Ok(())
    }
}
