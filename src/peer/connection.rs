use std::io::{self, Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;

use crate::error::{Error, Result};
use crate::peer::handshake::{Handshake, HANDSHAKE_LEN};
use crate::peer::message::{Message, MessageTag};

/// Deadline applied to every read on the peer socket.
pub const READ_DEADLINE: Duration = Duration::from_secs(3);

/// Upper bound on a frame body. The largest legitimate frame is a Piece
/// carrying one 16 KiB block, plus slack for bitfields of large torrents.
const MAX_FRAME: u32 = 1 << 16;

/// A framed, blocking transport to one peer. Owns the stream for the
/// lifetime of the session; any error leaves the connection to be dropped.
pub struct PeerConnection<S> {
    stream: S,
    /// The id the peer presented in its handshake.
    pub peer_id: [u8; 20],
}

impl PeerConnection<TcpStream> {
    /// Dials the peer and exchanges handshakes.
    pub fn connect(
        addr: SocketAddrV4,
        info_hash: [u8; 20],
        my_id: [u8; 20],
    ) -> Result<PeerConnection<TcpStream>> {
        let stream =
            TcpStream::connect_timeout(&addr.into(), READ_DEADLINE).map_err(Error::PeerUnreachable)?;
        stream.set_read_timeout(Some(READ_DEADLINE))?;
        debug!("connected to {addr}");
        PeerConnection::establish(stream, info_hash, my_id)
    }
}

impl<S: Read + Write> PeerConnection<S> {
    /// Runs the 68-byte handshake over an already-open stream and checks the
    /// reply against our info hash.
    pub fn establish(mut stream: S, info_hash: [u8; 20], my_id: [u8; 20]) -> Result<PeerConnection<S>> {
        stream.write_all(&Handshake::new(info_hash, my_id).to_bytes())?;
        let mut reply = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut reply).map_err(read_err)?;
        let reply = Handshake::from_bytes(&reply)?;
        if reply.info_hash != info_hash {
            return Err(Error::InfoHashMismatch);
        }
        debug!("handshake ok, peer id {}", hex::encode(reply.peer_id));
        Ok(PeerConnection {
            stream,
            peer_id: reply.peer_id,
        })
    }

    pub fn send(&mut self, message: &Message) -> Result<()> {
        debug!("-> {:?} ({} payload bytes)", message.tag(), message.payload_len());
        self.stream.write_all(&message.to_bytes())?;
        Ok(())
    }

    /// Reads one frame: 4-byte length prefix, then tag and payload. A zero
    /// prefix is a keepalive. `read_exact` loops over short reads, so a frame
    /// is consumed whole or fails as [`Error::TruncatedFrame`].
    pub fn recv(&mut self) -> Result<Message> {
        let len = self.stream.read_u32::<BigEndian>().map_err(read_err)?;
        if len == 0 {
            debug!("<- keepalive");
            return Ok(Message::KeepAlive);
        }
        if len > MAX_FRAME {
            return Err(Error::ProtocolViolation(format!("{len}-byte frame")));
        }
        let tag = self.stream.read_u8().map_err(read_err)?;
        let mut payload = vec![0u8; len as usize - 1];
        self.stream.read_exact(&mut payload).map_err(read_err)?;
        let message = Message::parse(tag, &payload)?;
        debug!("<- {:?} ({} payload bytes)", message.tag(), message.payload_len());
        Ok(message)
    }

    /// Receives the next real frame, silently consuming keepalives, and
    /// insists it carries `expected`. Any other tag is returned as
    /// [`Error::UnexpectedMessage`] with the received header preserved.
    pub fn recv_expect(&mut self, expected: MessageTag) -> Result<Message> {
        loop {
            let message = self.recv()?;
            match message.tag() {
                None => continue,
                Some(tag) if tag == expected => return Ok(message),
                Some(got) => {
                    return Err(Error::UnexpectedMessage {
                        expected,
                        got,
                        len: message.payload_len(),
                    })
                }
            }
        }
    }
}

fn read_err(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        io::ErrorKind::UnexpectedEof => Error::TruncatedFrame,
        _ => Error::Io(e),
    }
}
