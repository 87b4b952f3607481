//! One TCP connection's lifecycle: handshake, initial bitfield, choke state, message I/O.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream},
    time::Duration,
};

use crate::{
    bitfield::Bitfield,
    handshake::{Handshake, HandshakeError},
    message::{id, Message, MessageError},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

/// A peer's network address, as decoded from a tracker's compact peer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    ip: IpAddr,
    port: u16,
}

impl PeerAddr {
    fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl TryFrom<&[u8]> for PeerAddr {
    type Error = PeerError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 6 {
            return Err(PeerError::UnknownBytesListFormat);
        }
        Ok(Self {
            ip: IpAddr::V4(Ipv4Addr::new(value[0], value[1], value[2], value[3])),
            port: ((value[4] as u16) << 8) | value[5] as u16,
        })
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// An open, handshaken connection to one peer. Strictly owned by a single worker thread.
pub struct PeerSession {
    addr: PeerAddr,
    conn: TcpStream,
    pub choked: bool,
    pub peer_bitfield: Bitfield,
}

impl PeerSession {
    /// Connects, handshakes, and reads the peer's initial bitfield, all under short deadlines.
    pub fn open(addr: PeerAddr, own_peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<Self, PeerError> {
        let mut conn = TcpStream::connect_timeout(&addr.socket_addr(), CONNECT_TIMEOUT)
            .map_err(PeerError::ConnectFailure)?;

        conn.set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .map_err(PeerError::ConnectFailure)?;
        conn.set_write_timeout(Some(HANDSHAKE_TIMEOUT))
            .map_err(PeerError::ConnectFailure)?;

        Handshake::new(info_hash, own_peer_id).write(&mut conn)?;
        let peer_handshake = Handshake::read(&mut conn)?;
        if peer_handshake.info_hash != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        conn.set_read_timeout(Some(BITFIELD_TIMEOUT))
            .map_err(PeerError::ConnectFailure)?;
        let peer_bitfield = match Message::read(&mut conn)? {
            Some(msg) if msg.id == id::BITFIELD => Bitfield::from_bytes(msg.payload),
            _ => return Err(PeerError::ExpectedBitfield),
        };

        conn.set_read_timeout(None).map_err(PeerError::ConnectFailure)?;
        conn.set_write_timeout(None).map_err(PeerError::ConnectFailure)?;

        Ok(Self { addr, conn, choked: true, peer_bitfield })
    }

    pub fn addr(&self) -> PeerAddr {
        self.addr
    }

    /// Installs (or clears, with `None`) the read/write deadline for the whole connection.
    pub fn set_deadline(&self, deadline: Option<Duration>) -> Result<(), PeerError> {
        self.conn.set_read_timeout(deadline).map_err(PeerError::TransportError)?;
        self.conn.set_write_timeout(deadline).map_err(PeerError::TransportError)?;
        Ok(())
    }

    pub fn read_message(&mut self) -> Result<Option<Message>, PeerError> {
        Message::read(&mut self.conn).map_err(PeerError::from)
    }

    fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        message.write(&mut self.conn).map_err(PeerError::from)
    }

    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<(), PeerError> {
        self.send(&Message::make_request(index, begin, length))
    }

    pub fn send_interested(&mut self) -> Result<(), PeerError> {
        self.send(&Message::interested())
    }

    pub fn send_not_interested(&mut self) -> Result<(), PeerError> {
        self.send(&Message::not_interested())
    }

    pub fn send_unchoke(&mut self) -> Result<(), PeerError> {
        self.send(&Message::unchoke())
    }

    pub fn send_have(&mut self, index: u32) -> Result<(), PeerError> {
        self.send(&Message::make_have(index))
    }

    pub fn close(self) {
        let _ = self.conn.shutdown(std::net::Shutdown::Both);
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("peer address should have exactly 6 bytes (compact format)")]
    UnknownBytesListFormat,
    #[error("failed to connect to peer")]
    ConnectFailure(#[source] std::io::Error),
    #[error("peer's info_hash does not match ours")]
    InfoHashMismatch,
    #[error("peer did not send a Bitfield message as the first message")]
    ExpectedBitfield,
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("transport error on an established peer connection")]
    TransportError(#[source] std::io::Error),
}

impl PeerError {
    /// Connection-fatal errors: the worker should abandon this peer outright.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            PeerError::UnknownBytesListFormat
                | PeerError::ConnectFailure(_)
                | PeerError::InfoHashMismatch
                | PeerError::ExpectedBitfield
                | PeerError::Handshake(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peer_address() {
        let bytes = [127, 0, 0, 1, 0x1A, 0xE1];
        let peer = PeerAddr::try_from(&bytes[..]).unwrap();
        assert_eq!(peer.ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(peer.port, 0x1AE1);
    }

    #[test]
    fn rejects_wrong_length() {
        let bytes = [127, 0, 0, 1];
        assert!(matches!(
            PeerAddr::try_from(&bytes[..]),
            Err(PeerError::UnknownBytesListFormat)
        ));
    }
}
