use std::io;

use thiserror::Error;

use crate::peer::message::MessageTag;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a torrent file and a verified piece
/// on disk. Session failures are terminal: the connection is dropped and the
/// error surfaces to the caller, which decides whether to try another peer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed bencode: {0}")]
    MalformedBencode(String),

    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(String),

    #[error("tracker error: {0}")]
    TrackerError(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(io::Error),

    #[error("read deadline expired")]
    Timeout,

    #[error("peer does not speak the BitTorrent protocol")]
    ProtocolMismatch,

    #[error("handshake carried a different info hash")]
    InfoHashMismatch,

    #[error("expected {expected:?}, got {got:?} with {len} payload bytes")]
    UnexpectedMessage {
        expected: MessageTag,
        got: MessageTag,
        len: u32,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("peer choked us")]
    PeerChoked,

    #[error("peer does not have piece {0}")]
    PieceUnavailable(u32),

    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),

    #[error("stream ended in the middle of a frame")]
    TruncatedFrame,

    #[error(transparent)]
    Io(#[from] io::Error),
}
