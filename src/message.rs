//! Peer wire message framing: `length(4, big-endian) || id(1) || payload(length-1)`.
//! A frame with `length == 0` is a keep-alive and carries no id or payload.
//!
//! `Message` is deliberately a thin, untyped frame (id + payload bytes) rather than an enum of
//! typed variants: the protocol lets a peer send a malformed `Have` or an oversized `Piece`
//! payload, and those failures are handled very differently (one is swallowed, the other is
//! fatal) by code that has already matched on `id`. Keeping the frame untyped lets the typed
//! accessors (`parse_have`, `parse_piece`) apply their own validation independently of framing.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

pub mod id {
    pub const CHOKE: u8 = 0;
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const NOT_INTERESTED: u8 = 3;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
    pub const CANCEL: u8 = 8;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn choke() -> Message {
        Message::new(id::CHOKE, Vec::new())
    }

    pub fn unchoke() -> Message {
        Message::new(id::UNCHOKE, Vec::new())
    }

    pub fn interested() -> Message {
        Message::new(id::INTERESTED, Vec::new())
    }

    pub fn not_interested() -> Message {
        Message::new(id::NOT_INTERESTED, Vec::new())
    }

    pub fn make_request(index: u32, begin: u32, length: u32) -> Message {
        let mut payload = Vec::with_capacity(12);
        payload.extend(index.to_be_bytes());
        payload.extend(begin.to_be_bytes());
        payload.extend(length.to_be_bytes());
        Message::new(id::REQUEST, payload)
    }

    pub fn make_have(index: u32) -> Message {
        Message::new(id::HAVE, index.to_be_bytes().to_vec())
    }

    /// `None` serializes as the zero-length keep-alive.
    pub fn serialize(message: Option<&Message>) -> Vec<u8> {
        let Some(message) = message else {
            return vec![0, 0, 0, 0];
        };
        let len = (message.payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + len as usize);
        buf.write_u32::<BigEndian>(len).expect("writes to a Vec never fail");
        buf.push(message.id);
        buf.extend(&message.payload);
        buf
    }

    /// Reads exactly one frame. `Ok(None)` is a keep-alive.
    pub fn read<R: Read>(stream: &mut R) -> Result<Option<Message>, MessageError> {
        let len = stream.read_u32::<BigEndian>().map_err(read_error)?;
        if len == 0 {
            return Ok(None);
        }
        let message_id = stream.read_u8().map_err(read_error)?;
        let mut payload = vec![0u8; (len - 1) as usize];
        stream.read_exact(&mut payload).map_err(read_error)?;
        Ok(Some(Message::new(message_id, payload)))
    }

    pub fn write<W: Write>(&self, stream: &mut W) -> Result<(), MessageError> {
        stream
            .write_all(&Message::serialize(Some(self)))
            .map_err(MessageError::TransportError)
    }

    /// Requires `id == Have`, payload length exactly 4.
    pub fn parse_have(&self) -> Result<u32, MessageError> {
        if self.id != id::HAVE {
            return Err(MessageError::HaveMalformed);
        }
        if self.payload.len() != 4 {
            return Err(MessageError::HaveMalformed);
        }
        Ok(BigEndian::read_u32(&self.payload))
    }

    /// Requires `id == Piece`, payload length >= 8. Writes `payload[8..]` into
    /// `out_buffer[begin..]`, returning the byte count written.
    pub fn parse_piece(&self, expected_index: u32, out_buffer: &mut [u8]) -> Result<usize, MessageError> {
        if self.id != id::PIECE {
            return Err(MessageError::NotAPieceMessage);
        }
        if self.payload.len() < 8 {
            return Err(MessageError::Truncated);
        }
        let index = BigEndian::read_u32(&self.payload[0..4]);
        if index != expected_index {
            return Err(MessageError::IndexMismatch { expected: expected_index, actual: index });
        }
        let begin = BigEndian::read_u32(&self.payload[4..8]) as usize;
        if begin >= out_buffer.len() {
            return Err(MessageError::OffsetOutOfRange);
        }
        let data = &self.payload[8..];
        let end = begin.checked_add(data.len()).ok_or(MessageError::OverlongBlock)?;
        if end > out_buffer.len() {
            return Err(MessageError::OverlongBlock);
        }
        out_buffer[begin..end].copy_from_slice(data);
        Ok(data.len())
    }

    pub fn name(&self) -> &'static str {
        match self.id {
            id::CHOKE => "Choke",
            id::UNCHOKE => "Unchoke",
            id::INTERESTED => "Interested",
            id::NOT_INTERESTED => "NotInterested",
            id::HAVE => "Have",
            id::BITFIELD => "Bitfield",
            id::REQUEST => "Request",
            id::PIECE => "Piece",
            id::CANCEL => "Cancel",
            _ => "Unknown",
        }
    }
}

fn read_error(err: io::Error) -> MessageError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        MessageError::Truncated
    } else {
        MessageError::TransportError(err)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("message frame ended before the declared length was read")]
    Truncated,
    #[error("transport error while reading or writing a message")]
    TransportError(#[from] io::Error),
    #[error("expected a Piece message")]
    NotAPieceMessage,
    #[error("piece index mismatch: expected {expected}, got {actual}")]
    IndexMismatch { expected: u32, actual: u32 },
    #[error("piece block begin offset is out of range")]
    OffsetOutOfRange,
    #[error("piece block runs past the end of the piece buffer")]
    OverlongBlock,
    #[error("Have message payload is malformed")]
    HaveMalformed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_round_trip() {
        assert_eq!(Message::serialize(None), vec![0, 0, 0, 0]);
        let mut cursor = io::Cursor::new(vec![0, 0, 0, 0]);
        assert_eq!(Message::read(&mut cursor).unwrap(), None);
    }

    #[test]
    fn request_framing() {
        let msg = Message::make_request(4, 16384, 16384);
        let bytes = Message::serialize(Some(&msg));
        assert_eq!(
            bytes,
            vec![0, 0, 0, 13, 6, 0, 0, 0, 4, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
    }

    #[test]
    fn message_round_trip_through_bitfield() {
        let msg = Message::new(id::BITFIELD, vec![0b1010_0000, 0b0000_0001]);
        let bytes = Message::serialize(Some(&msg));
        let mut cursor = io::Cursor::new(bytes);
        let parsed = Message::read(&mut cursor).unwrap().unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn piece_parse_success() {
        let msg = Message::new(id::PIECE, vec![0, 0, 0, 7, 0, 0, 0, 8, 0xAA, 0xBB, 0xCC, 0xDD]);
        let mut buf = [0u8; 32];
        let written = msg.parse_piece(7, &mut buf).unwrap();
        assert_eq!(written, 4);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn piece_parse_rejects_wrong_index() {
        let msg = Message::new(id::PIECE, vec![0, 0, 0, 7, 0, 0, 0, 8, 0xAA, 0xBB, 0xCC, 0xDD]);
        let mut buf = [0u8; 32];
        let err = msg.parse_piece(6, &mut buf).unwrap_err();
        assert!(matches!(err, MessageError::IndexMismatch { expected: 6, actual: 7 }));
        assert_eq!(buf, [0u8; 32]);
    }

    #[test]
    fn piece_parse_rejects_overlong_block() {
        let msg = Message::new(id::PIECE, vec![0, 0, 0, 0, 0, 0, 0, 30, 1, 2, 3, 4]);
        let mut buf = [0u8; 32];
        let err = msg.parse_piece(0, &mut buf).unwrap_err();
        assert!(matches!(err, MessageError::OverlongBlock));
        assert_eq!(buf, [0u8; 32]);
    }

    #[test]
    fn parse_have_requires_have_id_and_length() {
        assert!(matches!(Message::choke().parse_have(), Err(MessageError::HaveMalformed)));
        assert!(matches!(
            Message::new(id::HAVE, vec![0, 1]).parse_have(),
            Err(MessageError::HaveMalformed)
        ));
        assert_eq!(Message::make_have(9).parse_have().unwrap(), 9);
    }
}
