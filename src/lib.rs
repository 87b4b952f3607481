pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece_downloader;
pub mod swarm;
pub mod torrent;
pub mod tracker;
