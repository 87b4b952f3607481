//! Fixed-form BitTorrent handshake: `pstrlen(1) || pstr(pstrlen) || reserved(8) || info_hash(20) || peer_id(20)`.

use std::io::{self, Read, Write};

pub const PSTR: &str = "BitTorrent protocol";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub pstr: String,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { pstr: PSTR.to_string(), info_hash, peer_id }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let pstr = self.pstr.as_bytes();
        let mut buf = Vec::with_capacity(1 + pstr.len() + 48);
        buf.push(pstr.len() as u8);
        buf.extend(pstr);
        buf.extend([0u8; 8]);
        buf.extend(self.info_hash);
        buf.extend(self.peer_id);
        buf
    }

    pub fn write<W: Write>(&self, stream: &mut W) -> Result<(), HandshakeError> {
        stream.write_all(&self.serialize()).map_err(HandshakeError::TransportError)
    }

    pub fn read<R: Read>(stream: &mut R) -> Result<Handshake, HandshakeError> {
        let mut pstrlen_buf = [0u8; 1];
        stream.read_exact(&mut pstrlen_buf).map_err(read_error)?;
        let pstrlen = pstrlen_buf[0] as usize;
        if pstrlen == 0 {
            return Err(HandshakeError::EmptyHandshake);
        }

        let mut rest = vec![0u8; pstrlen + 48];
        stream.read_exact(&mut rest).map_err(read_error)?;

        let pstr = String::from_utf8_lossy(&rest[..pstrlen]).into_owned();
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&rest[pstrlen + 8..pstrlen + 28]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&rest[pstrlen + 28..pstrlen + 48]);

        Ok(Handshake { pstr, info_hash, peer_id })
    }
}

fn read_error(err: io::Error) -> HandshakeError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => HandshakeError::HandshakeEmpty,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => HandshakeError::HandshakeTimeout,
        _ => HandshakeError::TransportError(err),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("handshake frame had a zero-length protocol string")]
    EmptyHandshake,
    #[error("peer closed the connection before sending a handshake")]
    HandshakeEmpty,
    #[error("handshake did not complete within the deadline")]
    HandshakeTimeout,
    #[error("transport error during handshake")]
    TransportError(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_matches_the_standard_frame() {
        let mut info_hash = [0u8; 20];
        for (i, b) in info_hash.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut peer_id = [0u8; 20];
        for (i, b) in peer_id.iter_mut().enumerate() {
            *b = (20 + i) as u8;
        }
        let hs = Handshake::new(info_hash, peer_id);
        let bytes = hs.serialize();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PSTR.as_bytes());
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &info_hash[..]);
        assert_eq!(&bytes[48..68], &peer_id[..]);
    }

    #[test]
    fn round_trip() {
        let hs = Handshake::new([7u8; 20], [9u8; 20]);
        let bytes = hs.serialize();
        let mut cursor = io::Cursor::new(bytes);
        let parsed = Handshake::read(&mut cursor).unwrap();
        assert_eq!(parsed, hs);
    }

    #[test]
    fn zero_length_pstr_is_rejected() {
        let mut cursor = io::Cursor::new(vec![0u8; 49]);
        let err = Handshake::read(&mut cursor).unwrap_err();
        assert!(matches!(err, HandshakeError::EmptyHandshake));
    }
}
