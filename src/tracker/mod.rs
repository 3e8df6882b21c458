//! HTTP tracker client.
//!
//! Builds the announce request for a torrent, performs the GET with a
//! bounded timeout, and parses the compact peer list out of the bencoded
//! response.
use crate::torrent::TorrentFile;
use rand::Rng;
use serde::Deserialize;
use serde_bytes::ByteBuf;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

/// Port advertised to the tracker.
pub const DEFAULT_PORT: u16 = 6881;

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);
const PEER_ID_PREFIX: &[u8; 8] = b"-NT0001-";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("invalid announce URL: {0}")]
    InvalidAnnounceUrl(#[from] url::ParseError),

    #[error("tracker failure: {0}")]
    Failure(String),

    #[error("malformed tracker response: {0}")]
    MalformedResponse(#[from] serde_bencode::Error),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A peer endpoint from the tracker's compact response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A parsed announce response.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default, rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: Option<ByteBuf>,
}

/// A client communicating with a BitTorrent tracker.
///
/// The 20-byte peer-id is generated once per client (client prefix plus
/// random tail) and reused for every announce and handshake of the run.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Announces to the torrent's tracker and returns the peer list.
    #[tracing::instrument(level = "debug", skip_all, fields(announce = %torrent.announce))]
    pub async fn announce(&self, torrent: &TorrentFile) -> TrackerResult<AnnounceResponse> {
        let url = self.build_announce_url(torrent)?;
        tracing::debug!(%url, "announcing to tracker");
        let http = reqwest::Client::builder()
            .timeout(ANNOUNCE_TIMEOUT)
            .build()?;
        let body = http.get(url).send().await?.bytes().await?;
        parse_announce_response(&body)
    }

    /// Appends the announce query parameters to the tracker URL.
    ///
    /// `info_hash` and `peer_id` are raw 20-byte values. They are
    /// percent-encoded here and spliced into the query verbatim; routing
    /// them through `query_pairs_mut` would encode the `%` signs a second
    /// time.
    fn build_announce_url(&self, torrent: &TorrentFile) -> TrackerResult<url::Url> {
        let mut url = url::Url::parse(&torrent.announce)?;
        url.query_pairs_mut()
            .append_pair("port", &self.port.to_string())
            .append_pair("uploaded", "0")
            .append_pair("downloaded", "0")
            .append_pair("left", &torrent.total_length().to_string())
            .append_pair("compact", "1");
        let query = format!(
            "{}&info_hash={}&peer_id={}",
            url.query().unwrap_or(""),
            url_encode(&torrent.info_hash),
            url_encode(&self.peer_id),
        );
        url.set_query(Some(&query));
        Ok(url)
    }
}

/// Parses a bencoded announce response body.
///
/// The compact `peers` value packs one peer per 6 bytes: a 4-byte IPv4
/// address followed by a big-endian port. Zero-address entries are
/// dropped.
fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
    let raw: RawResponse = serde_bencode::from_bytes(bytes)?;
    if let Some(reason) = raw.failure_reason {
        return Err(TrackerError::Failure(reason));
    }
    let compact = raw.peers.unwrap_or_default();
    let peers = compact
        .chunks_exact(6)
        .map(|chunk| Peer {
            ip: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
        })
        .filter(|peer| peer.ip != Ipv4Addr::UNSPECIFIED)
        .collect();
    Ok(AnnounceResponse {
        interval: raw.interval,
        peers,
    })
}

fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);
    rand::rng().fill(&mut peer_id[PEER_ID_PREFIX.len()..]);
    peer_id
}

/// Percent-encodes raw bytes per RFC 3986: unreserved characters pass
/// through, everything else becomes `%XX`.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::{FileLayout, InfoDict};

    fn test_torrent(info_hash: [u8; 20]) -> TorrentFile {
        TorrentFile {
            announce: "http://tracker.example:8080/announce".into(),
            info: InfoDict {
                name: "payload.bin".into(),
                piece_length: 256,
                pieces: vec![0u8; 60],
                layout: FileLayout::Single { length: 700 },
            },
            info_hash,
            piece_hashes: vec![[0u8; 20]; 3],
            created_by: None,
            comment: None,
            creation_date: None,
        }
    }

    #[test]
    fn url_encode_passes_unreserved_and_escapes_the_rest() {
        assert_eq!(url_encode(b"aZ09-._~"), "aZ09-._~");
        assert_eq!(url_encode(&[0x00, 0xff, b' ']), "%00%FF%20");
    }

    #[test]
    fn announce_url_carries_all_required_parameters() {
        let client = Client::new(DEFAULT_PORT);
        let url = client
            .build_announce_url(&test_torrent([0xaa; 20]))
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("port=6881"));
        assert!(query.contains("uploaded=0"));
        assert!(query.contains("downloaded=0"));
        assert!(query.contains("left=700"));
        assert!(query.contains("compact=1"));
        // Raw hash bytes are escaped exactly once.
        assert!(query.contains(&format!("info_hash={}", "%AA".repeat(20))));
        assert!(query.contains("peer_id=-NT0001-"));
    }

    #[test]
    fn parses_compact_peer_list_and_drops_zero_addresses() {
        let mut body = b"d8:intervali1800e5:peers18:".to_vec();
        body.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1]); // 10.0.0.1:6881
        body.extend_from_slice(&[0, 0, 0, 0, 0x1a, 0xe1]); // filtered
        body.extend_from_slice(&[192, 168, 1, 9, 0x00, 0x50]); // 192.168.1.9:80
        body.push(b'e');

        let response = parse_announce_response(&body).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(
            response.peers,
            vec![
                Peer {
                    ip: Ipv4Addr::new(10, 0, 0, 1),
                    port: 6881
                },
                Peer {
                    ip: Ipv4Addr::new(192, 168, 1, 9),
                    port: 80
                },
            ]
        );
        assert_eq!(response.peers[0].to_string(), "10.0.0.1:6881");
    }

    #[test]
    fn surfaces_tracker_failure_reason() {
        let body = b"d14:failure reason12:unregistered8:intervali0ee";
        assert!(matches!(
            parse_announce_response(body),
            Err(TrackerError::Failure(reason)) if reason == "unregistered"
        ));
    }

    #[test]
    fn peer_ids_are_prefixed_and_distinct() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_eq!(&a[..8], PEER_ID_PREFIX);
        assert_ne!(a, b);
    }
}
