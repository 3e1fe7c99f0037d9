//! The peer wire format: the handshake, length prefixed framing and the
//! protocol messages carried in the frames.

pub mod frame;
pub mod handshake;
pub mod message;

pub use frame::{FrameCodec, MessageParser};
pub use handshake::{Handshake, HandshakeCodec, HandshakeParser, PeerIdMatch};
pub use message::{Message, MessageId, PeerCodec};
