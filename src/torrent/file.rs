//! `.torrent` file parsing and piece geometry.
use super::{TorrentError, TorrentResult};
use crate::bencode::{self, BencodeValue};
use crate::torrent::info_hash::info_hash;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A parsed metainfo file.
///
/// `info_hash` is derived from the decoded `info` dictionary at parse time
/// and `piece_hashes` is the `pieces` byte string split into 20-byte SHA-1
/// digests, one per piece in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub announce: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub piece_hashes: Vec<[u8; 20]>,
    pub created_by: Option<String>,
    pub comment: Option<String>,
    pub creation_date: Option<SystemTime>,
}

/// The `info` dictionary: content name, piece geometry, and file layout.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoDict {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub layout: FileLayout,
}

/// Single-file torrents carry a bare `length`; multi-file torrents carry a
/// `files` list. A metainfo with both (or neither) is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLayout {
    Single { length: i64 },
    Multi { files: Vec<FileEntry> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub length: i64,
    pub path: Vec<String>,
}

impl TorrentFile {
    /// Reads and parses a `.torrent` file.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> TorrentResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(bencode::decode(&bytes)?)
    }

    /// Projects a decoded metainfo value into the typed record, validating
    /// the invariants the downloader relies on.
    pub fn parse(value: BencodeValue) -> TorrentResult<Self> {
        let BencodeValue::Dict(mut root) = value else {
            return Err(TorrentError::InvalidMetainfo(
                "root is not a dictionary".into(),
            ));
        };

        let announce = match root.remove(b"announce".as_slice()) {
            Some(BencodeValue::String(s)) => utf8("announce", s)?,
            _ => return Err(TorrentError::MissingField("announce")),
        };

        let info_map = match root.remove(b"info".as_slice()) {
            Some(BencodeValue::Dict(d)) => d,
            _ => return Err(TorrentError::MissingField("info")),
        };
        // The decoded map is hashed before projection so the digest covers
        // the info dictionary exactly as it appeared in the source file.
        let info_hash = info_hash(&info_map);
        let info = parse_info_dict(info_map)?;
        let piece_hashes = parse_pieces(&info.pieces)?;

        let created_by = optional_text(&mut root, b"created by");
        let comment = optional_text(&mut root, b"comment");
        let creation_date = match root.remove(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(secs)) if secs >= 0 => {
                Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
            }
            _ => None,
        };

        let torrent = Self {
            announce,
            info,
            info_hash,
            piece_hashes,
            created_by,
            comment,
            creation_date,
        };
        torrent.check_piece_count()?;
        Ok(torrent)
    }

    /// Total content length: the single `length`, or the sum over `files`.
    pub fn total_length(&self) -> i64 {
        match &self.info.layout {
            FileLayout::Single { length } => *length,
            FileLayout::Multi { files } => files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of piece `index`: `piece_length` for all but the last piece,
    /// which holds the remainder.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index + 1 < self.piece_count() {
            self.info.piece_length
        } else {
            self.total_length() - (self.piece_count() as i64 - 1) * self.info.piece_length
        }
    }

    fn check_piece_count(&self) -> TorrentResult<()> {
        let total = self.total_length();
        let expected = ((total + self.info.piece_length - 1) / self.info.piece_length) as usize;
        if expected != self.piece_count() {
            return Err(TorrentError::PieceCountMismatch {
                expected,
                found: self.piece_count(),
            });
        }
        Ok(())
    }
}

fn parse_info_dict(mut dict: HashMap<Vec<u8>, BencodeValue>) -> TorrentResult<InfoDict> {
    let piece_length = match dict.remove(b"piece length".as_slice()) {
        Some(BencodeValue::Integer(i)) if i > 0 => i,
        _ => return Err(TorrentError::MissingField("piece length")),
    };

    let pieces = match dict.remove(b"pieces".as_slice()) {
        Some(BencodeValue::String(s)) => s,
        _ => return Err(TorrentError::MissingField("pieces")),
    };

    let name = match dict.remove(b"name".as_slice()) {
        Some(BencodeValue::String(s)) => utf8("name", s)?,
        _ => return Err(TorrentError::MissingField("name")),
    };

    let length = dict.remove(b"length".as_slice());
    let files = dict.remove(b"files".as_slice());
    let layout = match (length, files) {
        (Some(_), Some(_)) => return Err(TorrentError::AmbiguousFileLayout),
        (Some(BencodeValue::Integer(length)), None) if length >= 0 => {
            FileLayout::Single { length }
        }
        (Some(_), None) => return Err(TorrentError::MissingField("length")),
        (None, Some(BencodeValue::List(entries))) => FileLayout::Multi {
            files: entries
                .into_iter()
                .map(parse_file_entry)
                .collect::<TorrentResult<Vec<_>>>()?,
        },
        _ => return Err(TorrentError::MissingField("length")),
    };

    Ok(InfoDict {
        name,
        piece_length,
        pieces,
        layout,
    })
}

fn parse_file_entry(value: BencodeValue) -> TorrentResult<FileEntry> {
    let BencodeValue::Dict(mut entry) = value else {
        return Err(TorrentError::InvalidMetainfo(
            "file entry is not a dictionary".into(),
        ));
    };
    let length = match entry.remove(b"length".as_slice()) {
        Some(BencodeValue::Integer(i)) if i >= 0 => i,
        _ => return Err(TorrentError::MissingField("files.length")),
    };
    let path = match entry.remove(b"path".as_slice()) {
        Some(BencodeValue::List(components)) if !components.is_empty() => components
            .into_iter()
            .map(|c| match c {
                BencodeValue::String(s) => utf8("files.path", s),
                _ => Err(TorrentError::MissingField("files.path")),
            })
            .collect::<TorrentResult<Vec<_>>>()?,
        _ => return Err(TorrentError::MissingField("files.path")),
    };
    Ok(FileEntry { length, path })
}

/// Splits the `pieces` byte string into 20-byte SHA-1 digests.
fn parse_pieces(pieces: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesLength(pieces.len()));
    }
    Ok(pieces
        .chunks_exact(20)
        .map(|chunk| chunk.try_into().expect("20-byte chunk"))
        .collect())
}

fn utf8(field: &'static str, bytes: Vec<u8>) -> TorrentResult<String> {
    String::from_utf8(bytes)
        .map_err(|_| TorrentError::InvalidMetainfo(format!("`{field}` is not UTF-8")))
}

fn optional_text(dict: &mut HashMap<Vec<u8>, BencodeValue>, key: &[u8]) -> Option<String> {
    match dict.remove(key) {
        Some(BencodeValue::String(s)) => String::from_utf8(s).ok(),
        _ => None,
    }
}
