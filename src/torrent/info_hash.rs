//! Info-hash derivation.
use crate::bencode::{self, BencodeValue};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// SHA-1 over the canonical bencoding of the `info` dictionary.
///
/// The dictionary is re-encoded with sorted keys, so for a compliant
/// `.torrent` file the digest matches the hash any other client derives
/// from the same bytes. This 20-byte value identifies the torrent in the
/// tracker announce and the peer handshake.
pub fn info_hash(info: &HashMap<Vec<u8>, BencodeValue>) -> [u8; 20] {
    let encoded = bencode::encode(&BencodeValue::Dict(info.clone()));
    let digest = Sha1::digest(&encoded);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn hash_matches_digest_of_canonical_bytes() {
        let raw: &[u8] = b"d6:lengthi1024e4:name4:test12:piece lengthi256ee";
        let BencodeValue::Dict(info) = decode(raw).unwrap() else {
            panic!("expected dict");
        };
        // Canonical re-encode reproduces the input, so the info-hash must
        // equal the digest of the raw bytes.
        assert_eq!(info_hash(&info), <[u8; 20]>::from(Sha1::digest(raw)));
    }

    #[test]
    fn hash_is_independent_of_source_key_order() {
        let sorted = decode(b"d1:ai1e1:bi2ee").unwrap();
        let unsorted = decode(b"d1:bi2e1:ai1ee").unwrap();
        let (BencodeValue::Dict(a), BencodeValue::Dict(b)) = (sorted, unsorted) else {
            panic!("expected dicts");
        };
        assert_eq!(info_hash(&a), info_hash(&b));
    }
}
