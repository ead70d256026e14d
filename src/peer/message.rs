use crate::error::{Error, Result};

/// The type byte carried after the length prefix. A keepalive has no tag at
/// all, so it does not appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
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

impl MessageTag {
    pub fn from_byte(byte: u8) -> Option<MessageTag> {
        match byte {
            0 => Some(MessageTag::Choke),
            1 => Some(MessageTag::Unchoke),
            2 => Some(MessageTag::Interested),
            3 => Some(MessageTag::NotInterested),
            4 => Some(MessageTag::Have),
            5 => Some(MessageTag::Bitfield),
            6 => Some(MessageTag::Request),
            7 => Some(MessageTag::Piece),
            8 => Some(MessageTag::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// `None` only for keepalives.
    pub fn tag(&self) -> Option<MessageTag> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageTag::Choke),
            Message::Unchoke => Some(MessageTag::Unchoke),
            Message::Interested => Some(MessageTag::Interested),
            Message::NotInterested => Some(MessageTag::NotInterested),
            Message::Have(_) => Some(MessageTag::Have),
            Message::Bitfield(_) => Some(MessageTag::Bitfield),
            Message::Request { .. } => Some(MessageTag::Request),
            Message::Piece { .. } => Some(MessageTag::Piece),
            Message::Cancel { .. } => Some(MessageTag::Cancel),
        }
    }

    pub fn payload_len(&self) -> u32 {
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 0,
            Message::Have(_) => 4,
            Message::Bitfield(bits) => bits.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 12,
            Message::Piece { block, .. } => 8 + block.len() as u32,
        }
    }

    /// Serializes the whole frame: 4-byte big-endian length prefix over the
    /// tag and payload. A keepalive is the bare zero prefix.
    pub fn to_bytes(&self) -> Vec<u8> {
        let Some(tag) = self.tag() else {
            return vec![0, 0, 0, 0];
        };
        let len = 1 + self.payload_len();
        let mut out = Vec::with_capacity(4 + len as usize);
        out.extend_from_slice(&len.to_be_bytes());
        out.push(tag as u8);
        match self {
            Message::Have(index) => out.extend_from_slice(&index.to_be_bytes()),
            Message::Bitfield(bits) => out.extend_from_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&begin.to_be_bytes());
                out.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&begin.to_be_bytes());
                out.extend_from_slice(block);
            }
            _ => {}
        }
        out
    }

    /// Decodes a frame body that arrived under `tag` with `payload` bytes.
    pub fn parse(tag: u8, payload: &[u8]) -> Result<Message> {
        let tag = MessageTag::from_byte(tag)
            .ok_or_else(|| Error::ProtocolViolation(format!("unknown message tag {tag}")))?;
        let message = match tag {
            MessageTag::Choke => Message::Choke,
            MessageTag::Unchoke => Message::Unchoke,
            MessageTag::Interested => Message::Interested,
            MessageTag::NotInterested => Message::NotInterested,
            MessageTag::Have => Message::Have(read_u32(payload, 0, tag)?),
            MessageTag::Bitfield => Message::Bitfield(payload.to_vec()),
            MessageTag::Request => Message::Request {
                index: read_u32(payload, 0, tag)?,
                begin: read_u32(payload, 4, tag)?,
                length: read_u32(payload, 8, tag)?,
            },
            MessageTag::Piece => Message::Piece {
                index: read_u32(payload, 0, tag)?,
                begin: read_u32(payload, 4, tag)?,
                block: payload
                    .get(8..)
                    .ok_or_else(|| bad_payload(tag, payload.len()))?
                    .to_vec(),
            },
            MessageTag::Cancel => Message::Cancel {
                index: read_u32(payload, 0, tag)?,
                begin: read_u32(payload, 4, tag)?,
                length: read_u32(payload, 8, tag)?,
            },
        };
        if message.payload_len() as usize != payload.len() {
            return Err(bad_payload(tag, payload.len()));
        }
        Ok(message)
    }
}

fn read_u32(payload: &[u8], at: usize, tag: MessageTag) -> Result<u32> {
    let bytes = payload
        .get(at..at + 4)
        .ok_or_else(|| bad_payload(tag, payload.len()))?;
    Ok(u32::from_be_bytes(bytes.try_into().expect("4-byte slice")))
}

fn bad_payload(tag: MessageTag, len: usize) -> Error {
    Error::ProtocolViolation(format!("{tag:?} message with {len}-byte payload"))
}
