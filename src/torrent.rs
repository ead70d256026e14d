use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use crate::bencode;
use crate::error::{Error, Result};

/// A parsed single-file metainfo (.torrent) file. Loaded once, read-only
/// afterwards; the tracker client and the session engine share it.
#[derive(Debug, Clone, Deserialize)]
pub struct Torrent {
    /// The URL of the tracker.
    pub announce: String,
    pub info: Info,
    #[serde(skip)]
    info_hash: [u8; 20],
}

#[derive(Debug, Clone, Deserialize)]
pub struct Info {
    /// Suggested name to save the file as. Purely advisory.
    pub name: String,
    /// The length of the file, in bytes.
    pub length: u64,
    /// Number of bytes in each piece, except possibly the last one.
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    /// Concatenation of the 20-byte SHA-1 hashes of each piece.
    pub pieces: ByteBuf,
}

impl Torrent {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Torrent> {
        let bytes = fs::read(path)?;
        Torrent::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Torrent> {
        let mut torrent: Torrent = serde_bencode::from_bytes(bytes)
            .map_err(|e| Error::InvalidMetainfo(e.to_string()))?;
        torrent.validate()?;
        torrent.info_hash = info_hash(bytes)?;
        Ok(torrent)
    }

    fn validate(&self) -> Result<()> {
        if self.info.length == 0 {
            return Err(Error::InvalidMetainfo("length must be positive".into()));
        }
        if self.info.piece_length == 0 {
            return Err(Error::InvalidMetainfo(
                "piece length must be positive".into(),
            ));
        }
        if self.info.pieces.len() % 20 != 0 {
            return Err(Error::InvalidMetainfo(format!(
                "pieces blob of {} bytes is not a multiple of 20",
                self.info.pieces.len()
            )));
        }
        let expected = self.info.length.div_ceil(self.info.piece_length);
        if self.info.pieces.len() as u64 / 20 != expected {
            return Err(Error::InvalidMetainfo(format!(
                "{} piece hashes for a file needing {expected}",
                self.info.pieces.len() / 20
            )));
        }
        Ok(())
    }

    /// SHA-1 of the canonical bencoding of the info dictionary.
    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.info
            .pieces
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect()
    }

    pub fn piece_count(&self) -> u32 {
        (self.info.pieces.len() / 20) as u32
    }

    /// Size of piece `index`. Every piece is `piece length` bytes except the
    /// last, which holds whatever remains; when the file length is an exact
    /// multiple, that remainder is a full piece.
    pub fn piece_size(&self, index: u32) -> u64 {
        let count = self.piece_count();
        if index + 1 < count {
            self.info.piece_length
        } else {
            self.info.length - u64::from(count - 1) * self.info.piece_length
        }
    }
}

/// Re-encodes the raw `info` dictionary canonically and hashes it. The typed
/// structs above cannot be used here: the hash is defined over the exact
/// sorted bencoding of whatever the file contained.
fn info_hash(metainfo: &[u8]) -> Result<[u8; 20]> {
    let root = bencode::decode(metainfo)?;
    let info = root
        .get(b"info")
        .ok_or_else(|| Error::InvalidMetainfo("missing info dictionary".into()))?;
    Ok(Sha1::digest(bencode::encode(info)).into())
}
