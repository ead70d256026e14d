use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use serde::Deserialize;
use serde_bytes::ByteBuf;
use url::Url;
use urlencoding::encode_binary;

use crate::error::{Error, Result};
use crate::torrent::Torrent;

/// Port we report to the tracker as our listening port.
pub const DEFAULT_PORT: u16 = 6881;

const TRACKER_TIMEOUT: Duration = Duration::from_secs(5);

/// What the tracker told us. Peers come back in the tracker's order.
#[derive(Debug)]
pub struct Announce {
    /// Seconds the tracker wants us to wait before re-announcing.
    pub interval: Option<u64>,
    pub peers: Vec<SocketAddrV4>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    interval: Option<u64>,
    peers: Option<ByteBuf>,
}

/// Announces to the torrent's tracker and returns the compact peer list.
/// One shot, no retries; callers decide what failure means.
pub fn announce(torrent: &Torrent, peer_id: &[u8; 20], port: u16) -> Result<Announce> {
    let url = Url::parse(&torrent.announce)
        .map_err(|e| Error::TrackerError(format!("bad announce url: {e}")))?;
    if url.scheme() != "http" {
        return Err(Error::TrackerError(format!(
            "unsupported announce scheme {:?}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::TrackerError("announce url has no host".into()))?;
    let addr = (host, url.port_or_known_default().unwrap_or(80))
        .to_socket_addrs()
        .map_err(|e| Error::TrackerError(format!("resolving {host}: {e}")))?
        .next()
        .ok_or_else(|| Error::TrackerError(format!("{host} did not resolve")))?;

    let request = build_request(&url, torrent, peer_id, port);
    debug!("announce to {addr}: {}", request.lines().next().unwrap_or(""));

    let raw = (|| {
        let mut stream = TcpStream::connect_timeout(&addr, TRACKER_TIMEOUT)?;
        stream.set_read_timeout(Some(TRACKER_TIMEOUT))?;
        stream.write_all(request.as_bytes())?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        Ok::<_, std::io::Error>(raw)
    })()
    .map_err(|e| Error::TrackerError(format!("tracker {host}: {e}")))?;

    parse_response(&raw)
}

fn build_request(url: &Url, torrent: &Torrent, peer_id: &[u8; 20], port: u16) -> String {
    let info_hash = torrent.info_hash();
    let mut query = match url.query() {
        Some(existing) => format!("{existing}&"),
        None => String::new(),
    };
    query.push_str(&format!(
        "info_hash={}&peer_id={}&port={port}&uploaded=0&downloaded=0&left={}&compact=1",
        encode_binary(&info_hash),
        encode_binary(peer_id),
        torrent.info.length,
    ));
    format!(
        "GET {}?{query} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        url.path(),
        url.host_str().unwrap_or_default(),
    )
}

fn parse_response(raw: &[u8]) -> Result<Announce> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    let body_start = match response
        .parse(raw)
        .map_err(|e| Error::TrackerError(format!("malformed http response: {e}")))?
    {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => {
            return Err(Error::TrackerError("truncated http response".into()))
        }
    };
    let code = response.code.unwrap_or(0);
    if code != 200 {
        return Err(Error::TrackerError(format!("tracker returned status {code}")));
    }

    let body: RawResponse = serde_bencode::from_bytes(&raw[body_start..])
        .map_err(|e| Error::TrackerError(format!("malformed announce body: {e}")))?;
    if let Some(reason) = body.failure_reason {
        return Err(Error::TrackerError(reason));
    }
    let blob = body
        .peers
        .ok_or_else(|| Error::TrackerError("announce response has no peers".into()))?;
    if blob.len() % 6 != 0 {
        return Err(Error::TrackerError(format!(
            "peers blob of {} bytes is not a multiple of 6",
            blob.len()
        )));
    }

    let peers = blob
        .chunks_exact(6)
        .map(|record| {
            SocketAddrV4::new(
                Ipv4Addr::new(record[0], record[1], record[2], record[3]),
                u16::from_be_bytes([record[4], record[5]]),
            )
        })
        .collect::<Vec<_>>();
    debug!(
        "tracker returned {} peers, re-announce interval {:?}s",
        peers.len(),
        body.interval
    );
    Ok(Announce {
        interval: body.interval,
        peers,
    })
}
