//! Torrent metainfo model.
//!
//! Projects a decoded `.torrent` file into a typed record, derives the
//! info-hash, and exposes the piece geometry the downloader schedules
//! against.
use thiserror::Error;

pub mod file;
pub mod info_hash;

pub use file::{FileEntry, FileLayout, InfoDict, TorrentFile};

/// Errors for metainfo that decoded as bencode but does not describe a
/// valid torrent.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(String),

    #[error("invalid metainfo: missing or mistyped field `{0}`")]
    MissingField(&'static str),

    #[error("invalid metainfo: pieces length {0} is not a multiple of 20")]
    InvalidPiecesLength(usize),

    #[error("invalid metainfo: both `length` and `files` are present")]
    AmbiguousFileLayout,

    #[error("invalid metainfo: {found} piece hashes but geometry implies {expected}")]
    PieceCountMismatch { expected: usize, found: usize },
}

pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
