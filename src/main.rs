use std::net::SocketAddrV4;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use minnow_bit::peer::connection::PeerConnection;
use minnow_bit::peer::session::Session;
use minnow_bit::torrent::Torrent;
use minnow_bit::tracker::http;
use minnow_bit::{bencode, PEER_ID};

#[derive(Parser, Debug)]
#[command(about = "A single-torrent, single-peer BitTorrent leech client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[clap(rename_all = "snake_case")]
enum Command {
    /// Print a bencoded value as JSON
    Decode { value: String },
    /// Summarize a torrent file
    Info { torrent: PathBuf },
    /// Ask the tracker for peers
    Peers { torrent: PathBuf },
    /// Handshake with one peer and print its id
    Handshake { torrent: PathBuf, peer: String },
    /// Download and verify a single piece
    DownloadPiece {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
        piece: u32,
    },
    /// Download the whole file
    Download {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Decode { value } => {
            let decoded = bencode::decode(value.as_bytes())?;
            println!("{}", decoded.to_json());
        }
        Command::Info { torrent } => {
            let torrent = Torrent::from_file(&torrent)?;
            println!("Tracker URL: {}", torrent.announce);
            println!("Length: {}", torrent.info.length);
            println!("Info Hash: {}", torrent.info_hash_hex());
            println!("Piece Length: {}", torrent.info.piece_length);
            println!("Piece Hashes:");
            for hash in torrent.piece_hashes() {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let torrent = Torrent::from_file(&torrent)?;
            let announce = http::announce(&torrent, &PEER_ID, http::DEFAULT_PORT)?;
            for peer in announce.peers {
                println!("{peer}");
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = Torrent::from_file(&torrent)?;
            let addr: SocketAddrV4 = peer.parse().context("peer must be <ip>:<port>")?;
            let conn = PeerConnection::connect(addr, torrent.info_hash(), PEER_ID)?;
            println!("Peer ID: {}", hex::encode(conn.peer_id));
        }
        Command::DownloadPiece {
            output,
            torrent,
            piece,
        } => {
            let torrent = Torrent::from_file(&torrent)?;
            let mut session = connect_to_first_peer(&torrent)?;
            let bytes = session.download_piece(piece)?;
            std::fs::write(&output, bytes)?;
            println!("Piece {piece} downloaded to {}.", output.display());
        }
        Command::Download {
            output,
            torrent: path,
        } => {
            let torrent = Torrent::from_file(&path)?;
            let mut session = connect_to_first_peer(&torrent)?;
            session.download_all(&output)?;
            println!("Downloaded {} to {}.", path.display(), output.display());
        }
    }
    Ok(())
}

/// Announces, then opens a session with the first peer the tracker returned.
/// No alternate-peer failover happens here.
fn connect_to_first_peer(
    torrent: &Torrent,
) -> anyhow::Result<Session<'_, std::net::TcpStream>> {
    let announce = http::announce(torrent, &PEER_ID, http::DEFAULT_PORT)?;
    let addr = *announce
        .peers
        .first()
        .context("tracker returned no peers")?;
    Ok(Session::connect(torrent, addr, PEER_ID)?)
}
