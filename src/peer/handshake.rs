use crate::error::{Error, Result};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Wire size of a handshake. Unlike every later message, the handshake is
/// not length-prefix framed: both sides exchange exactly this many bytes.
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut bytes = [0u8; HANDSHAKE_LEN];
        bytes[0] = PROTOCOL.len() as u8;
        bytes[1..20].copy_from_slice(PROTOCOL);
        bytes[20..28].copy_from_slice(&self.reserved);
        bytes[28..48].copy_from_slice(&self.info_hash);
        bytes[48..68].copy_from_slice(&self.peer_id);
        bytes
    }

    /// Parses a received handshake. A wrong length byte or protocol string
    /// means the other end is not a BitTorrent peer.
    pub fn from_bytes(bytes: &[u8; HANDSHAKE_LEN]) -> Result<Handshake> {
        if bytes[0] != PROTOCOL.len() as u8 || &bytes[1..20] != PROTOCOL {
            return Err(Error::ProtocolMismatch);
        }
        let mut handshake = Handshake::new([0; 20], [0; 20]);
        handshake.reserved.copy_from_slice(&bytes[20..28]);
        handshake.info_hash.copy_from_slice(&bytes[28..48]);
        handshake.peer_id.copy_from_slice(&bytes[48..68]);
        Ok(handshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let handshake = Handshake::new([7; 20], *b"00112233445566778899");
        let bytes = handshake.to_bytes();
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        let parsed = Handshake::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, handshake);
        assert_eq!(parsed.reserved, [0; 8]);
    }

    #[test]
    fn rejects_foreign_protocol() {
        let mut bytes = Handshake::new([7; 20], [1; 20]).to_bytes();
        bytes[1] = b'b';
        assert!(matches!(
            Handshake::from_bytes(&bytes),
            Err(Error::ProtocolMismatch)
        ));
        let mut bytes = Handshake::new([7; 20], [1; 20]).to_bytes();
        bytes[0] = 18;
        assert!(Handshake::from_bytes(&bytes).is_err());
    }
}
