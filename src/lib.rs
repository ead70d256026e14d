pub mod bencode;
pub mod bitfield;
pub mod error;
pub mod storage;
pub mod torrent;

pub mod tracker {
    pub mod http;
}

pub mod peer {
    pub mod connection;
    pub mod handshake;
    pub mod message;
    pub mod session;
}

/// The 20-byte id this client presents to trackers and peers.
pub const PEER_ID: [u8; 20] = *b"00112233445566778899";

/// Transfer unit within a piece.
pub const BLOCK_SIZE: u32 = 16 * 1024;
