//! Peer wire protocol.
//!
//! One TCP connection per peer: a 68-byte handshake preamble, then
//! length-prefixed messages. `session` drives the per-connection state
//! machine; `handshake` and `message` are the wire codecs.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use message::{Bitfield, Message, MessageId};
pub use session::PeerSession;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Unreachable(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake mismatch: {0}")]
    HandshakeMismatch(&'static str),

    #[error("peer timed out during {0}")]
    Timeout(&'static str),

    #[error("unexpected message: got {got:?}, expected {expected:?}")]
    UnexpectedMessage {
        got: MessageId,
        expected: MessageId,
    },

    #[error("malformed message frame: {0}")]
    MalformedFrame(&'static str),

    #[error("protocol state error: {0}")]
    State(&'static str),

    #[error("session is closed")]
    Closed,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
