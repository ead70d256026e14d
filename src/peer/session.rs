use std::io::{Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::path::Path;

use bytes::BytesMut;
use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::bitfield::Bitfield;
use crate::error::{Error, Result};
use crate::peer::connection::PeerConnection;
use crate::peer::message::{Message, MessageTag};
use crate::storage;
use crate::torrent::Torrent;
use crate::BLOCK_SIZE;

/// A serial download session with one peer.
///
/// The session runs a fixed preamble (handshake, the peer's Bitfield, our
/// Interested, the peer's Unchoke) and then downloads pieces one block at a
/// time with a single outstanding request. Every failure is terminal for the
/// session; dropping it closes the connection.
pub struct Session<'a, S> {
    torrent: &'a Torrent,
    conn: PeerConnection<S>,
    bitfield: Bitfield,
    am_interested: bool,
    peer_choking: bool,
}

impl<'a> Session<'a, TcpStream> {
    /// Dials `addr` and runs the full preamble.
    pub fn connect(torrent: &'a Torrent, addr: SocketAddrV4, my_id: [u8; 20]) -> Result<Self> {
        let conn = PeerConnection::connect(addr, torrent.info_hash(), my_id)?;
        Session::prepare(torrent, conn)
    }
}

impl<'a, S: Read + Write> Session<'a, S> {
    /// Runs the post-handshake preamble over an established connection:
    /// expect Bitfield, send Interested, expect Unchoke.
    pub fn prepare(torrent: &'a Torrent, mut conn: PeerConnection<S>) -> Result<Self> {
        let message = conn.recv_expect(MessageTag::Bitfield)?;
        let Message::Bitfield(bits) = message else {
            unreachable!("recv_expect returned a non-Bitfield frame");
        };
        let bitfield = Bitfield::new(bits);
        debug!(
            "peer has {} of {} pieces",
            bitfield.num_set(),
            torrent.piece_count()
        );

        conn.send(&Message::Interested)?;
        match conn.recv_expect(MessageTag::Unchoke) {
            Ok(_) => {}
            Err(Error::UnexpectedMessage {
                got: MessageTag::Choke,
                ..
            }) => return Err(Error::PeerChoked),
            Err(e) => return Err(e),
        }

        Ok(Session {
            torrent,
            conn,
            bitfield,
            am_interested: true,
            peer_choking: false,
        })
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.conn.peer_id
    }

    pub fn is_interested(&self) -> bool {
        self.am_interested
    }

    /// True once the peer has revoked (or never granted) our unchoke.
    pub fn is_choked(&self) -> bool {
        self.peer_choking
    }

    /// Downloads piece `index`, verifies it against its expected hash and
    /// returns the bytes. One Request is outstanding at any moment; a peer
    /// answering with fewer bytes than asked is tolerated by re-requesting
    /// the remainder.
    pub fn download_piece(&mut self, index: u32) -> Result<Vec<u8>> {
        if index >= self.torrent.piece_count() || !self.bitfield.has_piece(index) {
            return Err(Error::PieceUnavailable(index));
        }

        let piece_size = self.torrent.piece_size(index) as u32;
        let mut piece = BytesMut::with_capacity(piece_size as usize);
        let block_count = piece_size.div_ceil(BLOCK_SIZE);

        for block in 0..block_count {
            let begin = block * BLOCK_SIZE;
            let block_size = BLOCK_SIZE.min(piece_size - begin);
            let mut received = 0u32;
            while received < block_size {
                let offset = begin + received;
                self.conn.send(&Message::Request {
                    index,
                    begin: offset,
                    length: block_size - received,
                })?;
                let bytes = self.read_block(index, offset, block_size - received)?;
                piece.extend_from_slice(&bytes);
                received += bytes.len() as u32;
            }
        }

        let digest: [u8; 20] = Sha1::digest(&piece).into();
        if digest != self.torrent.piece_hashes()[index as usize] {
            return Err(Error::HashMismatch(index));
        }
        info!("piece {index} verified ({piece_size} bytes)");
        Ok(piece.to_vec())
    }

    /// Downloads every piece into `<output>.<index>` temporaries, then
    /// assembles them into `output`.
    pub fn download_all(&mut self, output: &Path) -> Result<()> {
        for index in 0..self.torrent.piece_count() {
            let piece = self.download_piece(index)?;
            storage::write_piece(output, index, &piece)?;
        }
        storage::assemble(output, self.torrent.piece_count())?;
        info!(
            "downloaded {} bytes to {}",
            self.torrent.info.length,
            output.display()
        );
        Ok(())
    }

    /// Waits for the Piece frame answering the outstanding request. Have
    /// messages update the bitfield, keepalives are consumed, a Choke aborts
    /// the piece.
    fn read_block(&mut self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        loop {
            match self.conn.recv()? {
                Message::Piece {
                    index: got_index,
                    begin: got_begin,
                    block,
                } => {
                    if got_index != index || got_begin != begin {
                        return Err(Error::ProtocolViolation(format!(
                            "piece {got_index} offset {got_begin} does not answer \
                             the request for piece {index} offset {begin}"
                        )));
                    }
                    if block.is_empty() || block.len() as u32 > length {
                        return Err(Error::ProtocolViolation(format!(
                            "{}-byte block for a {length}-byte request",
                            block.len()
                        )));
                    }
                    return Ok(block);
                }
                Message::Choke => {
                    self.peer_choking = true;
                    return Err(Error::PeerChoked);
                }
                Message::Have(piece) => self.bitfield.set_piece(piece),
                other => {
                    let Some(got) = other.tag() else { continue };
                    return Err(Error::UnexpectedMessage {
                        expected: MessageTag::Piece,
                        got,
                        len: other.payload_len(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::handshake::Handshake;
    use crate::PEER_ID;
    use std::net::{SocketAddr, TcpListener};
    use std::thread;

    /// Metainfo for a `payload.len()`-byte file with real piece hashes.
    fn fixture(payload: &[u8], piece_length: usize) -> Torrent {
        let mut pieces = Vec::new();
        for chunk in payload.chunks(piece_length) {
            pieces.extend_from_slice(&Sha1::digest(chunk));
        }
        let mut raw = format!(
            "d8:announce31:http://tracker.invalid/announce4:infod6:lengthi{}e\
             4:name8:data.bin12:piece lengthi{piece_length}e6:pieces{}:",
            payload.len(),
            pieces.len()
        )
        .into_bytes();
        raw.extend_from_slice(&pieces);
        raw.extend_from_slice(b"ee");
        Torrent::from_bytes(&raw).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// A scripted remote peer served from a background thread.
    struct FakePeer {
        payload: Vec<u8>,
        piece_length: usize,
        bitfield: Vec<u8>,
        /// Cap on block replies, to provoke short-block re-requests.
        max_block: Option<usize>,
        /// Answer the first Request with a Choke.
        choke_on_request: bool,
        /// Answer Requests at `begin + 1` to provoke a protocol violation.
        skew_offset: bool,
        /// Announce this piece via Have before the first block reply.
        have_first: Option<u32>,
    }

    impl FakePeer {
        fn new(payload: Vec<u8>, piece_length: usize) -> FakePeer {
            let piece_count = payload.len().div_ceil(piece_length);
            FakePeer {
                payload,
                piece_length,
                bitfield: vec![0xFF; piece_count.div_ceil(8)],
                max_block: None,
                choke_on_request: false,
                skew_offset: false,
                have_first: None,
            }
        }

        fn start(self, info_hash: [u8; 20]) -> SocketAddrV4 {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = match listener.local_addr().unwrap() {
                SocketAddr::V4(addr) => addr,
                SocketAddr::V6(_) => unreachable!(),
            };
            thread::spawn(move || {
                let (stream, _) = listener.accept().unwrap();
                self.serve(stream, info_hash);
            });
            addr
        }

        fn serve(mut self, mut stream: TcpStream, info_hash: [u8; 20]) {
            let mut handshake = [0u8; 68];
            stream.read_exact(&mut handshake).unwrap();
            let reply = Handshake::new(info_hash, *b"fakepeerfakepeer1234");
            stream.write_all(&reply.to_bytes()).unwrap();
            stream
                .write_all(&Message::Bitfield(self.bitfield.clone()).to_bytes())
                .unwrap();

            while let Some(message) = read_message(&mut stream) {
                match message {
                    Message::Interested => {
                        stream.write_all(&Message::Unchoke.to_bytes()).unwrap()
                    }
                    Message::Request {
                        index,
                        begin,
                        length,
                    } => {
                        if self.choke_on_request {
                            stream.write_all(&Message::Choke.to_bytes()).unwrap();
                            continue;
                        }
                        if let Some(piece) = self.have_first.take() {
                            stream.write_all(&Message::Have(piece).to_bytes()).unwrap();
                        }
                        let start = index as usize * self.piece_length + begin as usize;
                        let mut len = length as usize;
                        if let Some(cap) = self.max_block {
                            len = len.min(cap);
                        }
                        let block = self.payload[start..start + len].to_vec();
                        let begin = if self.skew_offset { begin + 1 } else { begin };
                        let frame = Message::Piece {
                            index,
                            begin,
                            block,
                        }
                        .to_bytes();
                        stream.write_all(&frame).unwrap();
                    }
                    _ => {}
                }
            }
        }
    }

    fn read_message(stream: &mut TcpStream) -> Option<Message> {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).ok()?;
        let len = u32::from_be_bytes(prefix);
        if len == 0 {
            return Some(Message::KeepAlive);
        }
        let mut tag = [0u8; 1];
        stream.read_exact(&mut tag).ok()?;
        let mut body = vec![0u8; len as usize - 1];
        stream.read_exact(&mut body).ok()?;
        Message::parse(tag[0], &body).ok()
    }

    #[test]
    fn downloads_and_verifies_a_piece() {
        let data = payload(100_000);
        let torrent = fixture(&data, 40_000);
        let addr = FakePeer::new(data.clone(), 40_000).start(torrent.info_hash());

        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        assert_eq!(session.peer_id(), *b"fakepeerfakepeer1234");
        assert!(session.is_interested());
        assert!(!session.is_choked());
        assert_eq!(session.download_piece(0).unwrap(), &data[..40_000]);
    }

    #[test]
    fn downloads_the_whole_file_including_the_tail_piece() {
        let data = payload(100_000);
        let torrent = fixture(&data, 40_000);
        let addr = FakePeer::new(data.clone(), 40_000).start(torrent.info_hash());

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");
        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        session.download_all(&output).unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), data);
        // temporaries are gone
        assert!(!dir.path().join("out.bin.0").exists());
        assert!(!dir.path().join("out.bin.2").exists());
    }

    #[test]
    fn short_blocks_are_re_requested() {
        let data = payload(5_000);
        let torrent = fixture(&data, 5_000);
        let mut peer = FakePeer::new(data.clone(), 5_000);
        peer.max_block = Some(1_000);
        let addr = peer.start(torrent.info_hash());

        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        assert_eq!(session.download_piece(0).unwrap(), data);
    }

    #[test]
    fn have_during_download_is_absorbed() {
        let data = payload(5_000);
        let torrent = fixture(&data, 5_000);
        let mut peer = FakePeer::new(data.clone(), 5_000);
        peer.have_first = Some(0);
        let addr = peer.start(torrent.info_hash());

        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        assert_eq!(session.download_piece(0).unwrap(), data);
    }

    #[test]
    fn choke_aborts_the_piece() {
        let data = payload(5_000);
        let torrent = fixture(&data, 5_000);
        let mut peer = FakePeer::new(data.clone(), 5_000);
        peer.choke_on_request = true;
        let addr = peer.start(torrent.info_hash());

        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        assert!(matches!(
            session.download_piece(0),
            Err(Error::PeerChoked)
        ));
        assert!(session.is_choked());
    }

    #[test]
    fn missing_piece_is_unavailable() {
        let data = payload(5_000);
        let torrent = fixture(&data, 5_000);
        let mut peer = FakePeer::new(data.clone(), 5_000);
        peer.bitfield = vec![0x00];
        let addr = peer.start(torrent.info_hash());

        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        assert!(matches!(
            session.download_piece(0),
            Err(Error::PieceUnavailable(0))
        ));
        // an index past the end of the torrent is just as unavailable
        assert!(matches!(
            session.download_piece(9),
            Err(Error::PieceUnavailable(9))
        ));
    }

    #[test]
    fn misaligned_block_is_a_protocol_violation() {
        let data = payload(5_000);
        let torrent = fixture(&data, 5_000);
        let mut peer = FakePeer::new(data.clone(), 5_000);
        peer.skew_offset = true;
        let addr = peer.start(torrent.info_hash());

        let mut session = Session::connect(&torrent, addr, PEER_ID).unwrap();
        assert!(matches!(
            session.download_piece(0),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
