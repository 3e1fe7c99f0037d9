use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::peer::HandshakeError, PeerId, Sha1Hash};

pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// The full length of a version 1 handshake, in bytes.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

// Offsets of the fields within the handshake.
const PROT_END: usize = 1 + 19;
const RESERVED_END: usize = PROT_END + 8;
const INFO_HASH_END: usize = RESERVED_END + 20;

/// The message sent at the beginning of a peer session by both
/// sides of the connection.
///
/// handshake data format:
///
/// ```txt
/// <pstrlen><pstr><reserved><info_hash><peer_id>
///
/// |-1 byte-|-19 bytes-|-8 bytes-|-20 bytes-|-20 bytes-|
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Handshake {
    /// The protocol string, which must equal "BitTorrent protocol",
    /// as otherwise the connection will aborted.
    pub prot: [u8; 19],
    /// A reserved field. This is where the client's supported extensions
    /// are announced; we only ever look at the DHT bit.
    pub reserved: [u8; 8],
    /// The torrent's SHA1 info hash, used to identify the torrent in the
    /// handshake and to verify the peer.
    pub info_hash: Sha1Hash,
    /// The arbitrary peer id, usually used to identify the torrent client.
    pub peer_id: PeerId,
}

impl Handshake {
    /// Create a new protocol version 1 handshake with the given info_hash and
    /// peer_id.
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        let mut prot = [0; 19];
        prot.copy_from_slice(PROTOCOL_STRING.as_bytes());
        Handshake {
            prot,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Whether the peer advertises DHT support (bit 0 of the last reserved
    /// byte).
    pub fn supports_dht(&self) -> bool {
        self.reserved[7] & 0x01 != 0
    }

    /// Returns the length of handshake, in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> usize {
        HANDSHAKE_LEN
    }
}

/// What we accept as the remote peer's id.
///
/// Peers learned from a tracker's compact response have no known id, in
/// which case any id goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerIdMatch {
    Any,
    Exact(PeerId),
}

impl From<Option<PeerId>> for PeerIdMatch {
    fn from(id: Option<PeerId>) -> Self {
        match id {
            Some(id) => Self::Exact(id),
            None => Self::Any,
        }
    }
}

/// Encodes our handshake and validates the peer's.
///
/// Decoding checks each field as soon as its bytes are in the buffer, so a
/// wrong protocol prefix is reported after the very first byte, and a wrong
/// info hash before the peer id has arrived.
pub struct HandshakeCodec {
    info_hash: Sha1Hash,
    peer_id: PeerIdMatch,
}

impl HandshakeCodec {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerIdMatch) -> Self {
        Self { info_hash, peer_id }
    }
}

impl Encoder<Handshake> for HandshakeCodec {
    type Error = HandshakeError;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), HandshakeError> {
        let Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        } = handshake;

        // we should only be sending the bittorrent protocol string
        debug_assert_eq!(prot, PROTOCOL_STRING.as_bytes());

        buf.reserve(HANDSHAKE_LEN);
        buf.put_u8(prot.len() as u8);
        buf.extend_from_slice(&prot);
        buf.extend_from_slice(&reserved);
        buf.extend_from_slice(&info_hash);
        buf.extend_from_slice(&peer_id);

        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = HandshakeError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Handshake>, HandshakeError> {
        if buf.is_empty() {
            return Ok(None);
        }

        // We only peek at the fields until the whole handshake is in the
        // buffer, since the bytes after it belong to the message stream.
        if buf[0] as usize != PROTOCOL_STRING.len() {
            return Err(HandshakeError::ProtocolMismatch);
        }

        if buf.len() < PROT_END {
            return Ok(None);
        }
        if &buf[1..PROT_END] != PROTOCOL_STRING.as_bytes() {
            return Err(HandshakeError::ProtocolMismatch);
        }

        if buf.len() < INFO_HASH_END {
            return Ok(None);
        }
        if buf[RESERVED_END..INFO_HASH_END] != self.info_hash {
            return Err(HandshakeError::InfoHashMismatch);
        }

        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }
        if let PeerIdMatch::Exact(expected) = self.peer_id {
            if buf[INFO_HASH_END..HANDSHAKE_LEN] != expected {
                return Err(HandshakeError::PeerIdMismatch);
            }
        }

        // the handshake is valid, consume it
        buf.advance(1);
        let mut prot = [0; 19];
        buf.copy_to_slice(&mut prot);
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

/// Accumulates incoming bytes until a valid handshake can be decoded.
///
/// Once the handshake is out, whatever followed it in the stream is handed
/// over with [`HandshakeParser::take_remaining`].
pub struct HandshakeParser {
    codec: HandshakeCodec,
    buf: BytesMut,
}

impl HandshakeParser {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerIdMatch) -> Self {
        Self {
            codec: HandshakeCodec::new(info_hash, peer_id),
            buf: BytesMut::with_capacity(HANDSHAKE_LEN),
        }
    }

    /// Appends newly arrived bytes and tries to decode the handshake.
    pub fn append(
        &mut self,
        data: &[u8],
    ) -> Result<Option<Handshake>, HandshakeError> {
        self.buf.extend_from_slice(data);
        self.codec.decode(&mut self.buf)
    }

    /// Returns the bytes received past the handshake.
    pub fn take_remaining(&mut self) -> BytesMut {
        self.buf.split()
    }
}
