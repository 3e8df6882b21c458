//! The handshake preamble.
//!
//! The handshake is the first exchange on a peer connection and the only
//! one that is not length-prefixed: a single 68-byte block in each
//! direction. It proves both ends speak the protocol and are talking
//! about the same torrent.
use super::{PeerError, PeerResult};

/// On-wire size: length byte + 19-byte marker + 8 reserved + two 20-byte ids.
pub const HANDSHAKE_LEN: usize = 68;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// `0x13` ‖ `"BitTorrent protocol"` ‖ 8 reserved zero bytes ‖
    /// info-hash ‖ peer-id.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a received handshake block, validating the protocol marker.
    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> PeerResult<Self> {
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL {
            return Err(PeerError::HandshakeMismatch("protocol marker"));
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { info_hash, peer_id })
    }

    /// The returned info-hash must match the one we sent; anything else
    /// means the peer is serving a different torrent.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> PeerResult<()> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::HandshakeMismatch("info hash"));
        }
        Ok(())
    }
}
