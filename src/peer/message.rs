//! Message framing for the peer wire protocol.
//!
//! After the handshake every message is `<4-byte BE length><1-byte id>
//! <payload>`; a zero length prefix is a keep-alive with no id or
//! payload.
use super::{PeerError, PeerResult};
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::Cursor;

/// Size of a block within a piece, and thus of the data in a single
/// REQUEST/PIECE exchange (the final block of a piece may be shorter).
pub const BLOCK_SIZE: u32 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> PeerResult<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => Err(PeerError::MalformedFrame("unknown message id")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

/// The decoded payload of a PIECE message.
#[derive(Debug, PartialEq, Eq)]
pub struct PieceBlock<'a> {
    pub index: u32,
    pub begin: u32,
    pub block: &'a [u8],
}

impl Message {
    pub fn new(id: MessageId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn interested() -> Self {
        Self::new(MessageId::Interested, Vec::new())
    }

    /// REQUEST for `length` bytes of piece `index` starting at `begin`.
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u32(index);
        payload.put_u32(begin);
        payload.put_u32(length);
        Self::new(MessageId::Request, payload.to_vec())
    }

    /// Frames the message as `<be32 len(payload)+1><id><payload>`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + 1 + self.payload.len());
        buf.put_u32(self.payload.len() as u32 + 1);
        buf.put_u8(self.id as u8);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Decodes a PIECE payload: 4-byte index, 4-byte begin, then the raw
    /// block bytes.
    pub fn parse_piece(&self) -> PeerResult<PieceBlock<'_>> {
        if self.id != MessageId::Piece {
            return Err(PeerError::MalformedFrame("not a piece message"));
        }
        if self.payload.len() < 8 {
            return Err(PeerError::MalformedFrame("piece payload too short"));
        }
        let mut cursor = Cursor::new(&self.payload[..8]);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()?;
        Ok(PieceBlock {
            index,
            begin,
            block: &self.payload[8..],
        })
    }
}

/// A peer's piece inventory, as sent in its BITFIELD message.
///
/// Bits are MSB-first: piece `i` lives in byte `i / 8` at bit `7 - i % 8`.
#[derive(Debug, Clone, Default)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    pub fn new(bits: Vec<u8>) -> Self {
        Self { bits }
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bits
            .get(index / 8)
            .is_some_and(|byte| byte >> (7 - index % 8) & 1 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_length_prefix_id_and_payload() {
        let message = Message::new(MessageId::Piece, vec![1, 2, 3]);
        assert_eq!(message.encode(), vec![0, 0, 0, 4, 7, 1, 2, 3]);
    }

    #[test]
    fn frames_empty_payload_as_length_one() {
        assert_eq!(Message::interested().encode(), vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn adjacent_frames_concatenate_cleanly() {
        let mut wire = Message::request(7, 0, 16384).encode();
        wire.extend(Message::interested().encode());
        assert_eq!(
            wire,
            vec![
                0, 0, 0, 13, 6, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0x40, 0, // request
                0, 0, 0, 1, 2, // interested
            ]
        );
    }

    #[test]
    fn request_payload_is_three_be32_fields() {
        let message = Message::request(2, 32768, 16384);
        assert_eq!(message.id, MessageId::Request);
        assert_eq!(
            message.payload,
            vec![0, 0, 0, 2, 0, 0, 0x80, 0, 0, 0, 0x40, 0]
        );
    }

    #[test]
    fn parses_piece_payload() {
        let mut payload = vec![0, 0, 0, 5, 0, 0, 0x40, 0];
        payload.extend_from_slice(b"data!");
        let message = Message::new(MessageId::Piece, payload);
        let piece = message.parse_piece().unwrap();
        assert_eq!(piece.index, 5);
        assert_eq!(piece.begin, 16384);
        assert_eq!(piece.block, b"data!");
    }

    #[test]
    fn rejects_short_piece_payload() {
        let message = Message::new(MessageId::Piece, vec![0; 7]);
        assert!(matches!(
            message.parse_piece(),
            Err(PeerError::MalformedFrame(_))
        ));
    }

    #[test]
    fn bitfield_indexes_msb_first() {
        // 0b1010_0000, 0b0000_0001: pieces 0, 2, and 15.
        let bitfield = Bitfield::new(vec![0xa0, 0x01]);
        assert!(bitfield.has_piece(0));
        assert!(!bitfield.has_piece(1));
        assert!(bitfield.has_piece(2));
        assert!(bitfield.has_piece(15));
        assert!(!bitfield.has_piece(14));
        // Out of range is simply absent.
        assert!(!bitfield.has_piece(16));
        assert!(!bitfield.has_piece(1000));
    }

    #[test]
    fn rejects_unknown_message_id() {
        assert!(MessageId::try_from(9).is_err());
        assert_eq!(MessageId::try_from(7).unwrap(), MessageId::Piece);
    }
}
