use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::{
    blockinfo::BlockInfo,
    error::peer::Result,
    peer::codec::{
        Handshake, HandshakeCodec, HandshakeParser, Message, MessageParser,
        PeerCodec, PeerIdMatch,
    },
    Sha1Hash,
};

/// What came out of the incoming byte stream.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Handshake(Handshake),
    Message(Message),
}

/// Attached to a send, handed back once the transport wrote the last byte
/// of that send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendToken {
    Handshake,
    Block(BlockInfo),
}

/// The per-connection codec. It performs no IO: the session feeds it
/// received bytes and drains the bytes it has to write, and reports back
/// how many of those the transport managed to write.
pub struct Communicator {
    handshake: HandshakeParser,
    handshake_codec: HandshakeCodec,
    messages: MessageParser,
    handshake_received: bool,
    peer_codec: PeerCodec,

    outgoing: BytesMut,
    /// Bytes ever queued for writing.
    queued: u64,
    /// Bytes the transport reported written.
    written: u64,
    /// Tokens keyed by the stream offset at which their send ends.
    tokens: VecDeque<(u64, SendToken)>,
}

impl Communicator {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerIdMatch) -> Self {
        Self {
            handshake: HandshakeParser::new(info_hash, peer_id),
            handshake_codec: HandshakeCodec::new(info_hash, peer_id),
            messages: MessageParser::new(),
            handshake_received: false,
            peer_codec: PeerCodec,
            outgoing: BytesMut::new(),
            queued: 0,
            written: 0,
            tokens: VecDeque::new(),
        }
    }

    pub fn handshake_received(&self) -> bool {
        self.handshake_received
    }

    /// Feeds received bytes through the handshake parser first and, once
    /// the handshake is out, through the message parser.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<Inbound>> {
        let mut inbound = Vec::new();
        let frames = if self.handshake_received {
            self.messages.append(data)?
        } else {
            match self.handshake.append(data)? {
                None => return Ok(inbound),
                Some(handshake) => {
                    self.handshake_received = true;
                    inbound.push(Inbound::Handshake(handshake));
                    let rest = self.handshake.take_remaining();
                    self.messages.append(&rest)?
                }
            }
        };

        for frame in frames {
            inbound.push(Inbound::Message(Message::decode(frame)?));
        }
        Ok(inbound)
    }

    pub fn send_handshake(
        &mut self,
        handshake: Handshake,
        token: Option<SendToken>,
    ) -> Result<()> {
        let before = self.outgoing.len();
        self.handshake_codec.encode(handshake, &mut self.outgoing)?;
        self.queued_with(before, token);
        Ok(())
    }

    pub fn send(&mut self, msg: Message, token: Option<SendToken>) -> Result<()> {
        let before = self.outgoing.len();
        self.peer_codec.encode(msg, &mut self.outgoing)?;
        self.queued_with(before, token);
        Ok(())
    }

    fn queued_with(&mut self, before: usize, token: Option<SendToken>) {
        self.queued += (self.outgoing.len() - before) as u64;
        if let Some(token) = token {
            self.tokens.push_back((self.queued, token));
        }
    }

    /// Takes everything encoded since the last call, for the transport to
    /// write.
    pub fn take_outgoing(&mut self) -> Option<Bytes> {
        if self.outgoing.is_empty() {
            return None;
        }
        Some(self.outgoing.split().freeze())
    }

    /// The transport wrote `n` more bytes. Returns the tokens of the sends
    /// that are now fully written, in send order.
    pub fn on_written(&mut self, n: usize) -> Vec<SendToken> {
        let n = n as u64;
        self.written = (self.written + n).min(self.queued);
        let mut fired = Vec::new();
        while let Some(&(end, token)) = self.tokens.front() {
            if end > self.written {
                break;
            }
            self.tokens.pop_front();
            fired.push(token);
        }
        fired
    }
}
