//! Per-piece pipelined block-request state machine, run over one already-open peer session.

use std::time::Duration;

use crate::{
    message::id,
    peer::{PeerError, PeerSession},
};

const MAX_PIPELINE: usize = 5;
const MAX_BLOCK: u32 = 16384;
const PIECE_DEADLINE: Duration = Duration::from_secs(30);

/// One piece's worth of outstanding work, as handed out by the swarm coordinator.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub index: u32,
    pub hash: [u8; 20],
    pub length: u32,
}

struct Progress {
    buffer: Vec<u8>,
    downloaded: u32,
    requested: u32,
    in_flight: usize,
}

/// Pipelines block requests for `work` over `session` until the piece is fully received.
pub fn download_piece(session: &mut PeerSession, work: &WorkItem) -> Result<Vec<u8>, PeerError> {
    session.set_deadline(Some(PIECE_DEADLINE))?;
    let result = run(session, work);
    session.set_deadline(None)?;
    result
}

fn run(session: &mut PeerSession, work: &WorkItem) -> Result<Vec<u8>, PeerError> {
    let mut progress = Progress {
        buffer: vec![0u8; work.length as usize],
        downloaded: 0,
        requested: 0,
        in_flight: 0,
    };

    while progress.downloaded < work.length {
        fill_pipeline(session, work, &mut progress)?;

        match session.read_message()? {
            None => {}
            Some(msg) => match msg.id {
                id::CHOKE => session.choked = true,
                id::UNCHOKE => session.choked = false,
                id::HAVE => {
                    // A malformed Have is non-fatal: the peer just doesn't get the update.
                    if let Ok(index) = msg.parse_have() {
                        session.peer_bitfield.set(index);
                    }
                }
                id::PIECE => {
                    let written = msg.parse_piece(work.index, &mut progress.buffer)?;
                    progress.downloaded += written as u32;
                    progress.in_flight = progress.in_flight.saturating_sub(1);
                }
                _ => {}
            },
        }
    }

    Ok(progress.buffer)
}

fn fill_pipeline(session: &mut PeerSession, work: &WorkItem, progress: &mut Progress) -> Result<(), PeerError> {
    if session.choked {
        return Ok(());
    }
    while progress.in_flight < MAX_PIPELINE && progress.requested < work.length {
        let block = MAX_BLOCK.min(work.length - progress.requested);
        session.send_request(work.index, progress.requested, block)?;
        progress.requested += block;
        progress.in_flight += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use crate::{handshake::Handshake, message::Message, peer::PeerAddr};

    use super::*;

    /// Accepts one connection, handshakes, advertises a bitfield with every bit of
    /// `piece_count` set, unchokes, then answers each `Request` with a `Piece` carrying
    /// `data`.
    fn spawn_single_piece_peer(piece_count: usize, data: &'static [u8]) -> PeerAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let their_handshake = Handshake::read(&mut stream).unwrap();
            Handshake::new(their_handshake.info_hash, [9u8; 20]).write(&mut stream).unwrap();

            let bitfield_byte = 0xFFu8 << (8 - piece_count.min(8));
            Message::new(crate::message::id::BITFIELD, vec![bitfield_byte])
                .write(&mut stream)
                .unwrap();
            Message::unchoke().write(&mut stream).unwrap();

            while let Ok(Some(msg)) = Message::read(&mut stream) {
                if msg.id != crate::message::id::REQUEST {
                    continue;
                }
                use byteorder::ByteOrder;
                let begin = byteorder::BigEndian::read_u32(&msg.payload[4..8]) as usize;
                let length = byteorder::BigEndian::read_u32(&msg.payload[8..12]) as usize;
                let index = byteorder::BigEndian::read_u32(&msg.payload[0..4]);

                let mut payload = Vec::with_capacity(8 + length);
                payload.extend(index.to_be_bytes());
                payload.extend((begin as u32).to_be_bytes());
                payload.extend(&data[begin..begin + length]);
                Message::new(crate::message::id::PIECE, payload).write(&mut stream).unwrap();
            }
        });

        let bytes = [127, 0, 0, 1, (port >> 8) as u8, (port & 0xFF) as u8];
        PeerAddr::try_from(&bytes[..]).unwrap()
    }

    #[test]
    fn downloads_a_single_block_piece_over_loopback() {
        let addr = spawn_single_piece_peer(1, b"abcd");
        let mut session = PeerSession::open(addr, [1u8; 20], [2u8; 20]).unwrap();

        let work = WorkItem { index: 0, hash: [0u8; 20], length: 4 };
        let buffer = download_piece(&mut session, &work).unwrap();

        assert_eq!(buffer, b"abcd");
    }
}
