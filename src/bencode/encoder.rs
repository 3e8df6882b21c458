//! Canonical bencode encoder.
//!
//! Dictionaries are emitted with their keys sorted ascending by raw bytes,
//! which is the canonical form required for info-hash computation: a
//! compliant `.torrent` file's `info` dictionary round-trips through
//! decode → encode byte-identically.
use super::BencodeValue;

/// Encodes `value` into its canonical bencode byte form.
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(&mut buf, value);
    buf
}

fn encode_into(buf: &mut Vec<u8>, value: &BencodeValue) {
    match value {
        BencodeValue::String(s) => {
            buf.extend_from_slice(s.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(s);
        }
        BencodeValue::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        BencodeValue::List(list) => {
            buf.push(b'l');
            for item in list {
                encode_into(buf, item);
            }
            buf.push(b'e');
        }
        BencodeValue::Dict(dict) => {
            let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
            keys.sort_unstable();
            buf.push(b'd');
            for key in keys {
                encode_into(buf, &BencodeValue::String(key.clone()));
                encode_into(buf, &dict[key]);
            }
            buf.push(b'e');
        }
    }
}
