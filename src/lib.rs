//! Library root for nanotorrent.
//!
//! Re-exports the core modules: bencode codec, torrent model, tracker
//! client, peer wire protocol, and the download engine used by the `ntc`
//! binary.
pub mod bencode;
pub mod download;
pub mod peer;
pub mod torrent;
pub mod tracker;
