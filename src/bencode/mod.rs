//! Bencode codec.
//!
//! Bencode is the serialization format used by BitTorrent metainfo files,
//! tracker responses, and the wire-level `info` dictionary. This module
//! provides a strict decoder, a canonical encoder, and a JSON-ish debug
//! rendering used by the `decode` subcommand.
use std::collections::HashMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

pub use decoder::decode;
pub use encoder::encode;

/// A decoded bencode value.
///
/// Byte strings are kept as raw bytes: the `pieces` value of a torrent is a
/// concatenation of binary SHA-1 digests and must never be UTF-8-validated
/// or otherwise transformed.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

/// Errors produced while decoding malformed bencode input.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("invalid integer literal")]
    InvalidInteger,

    #[error("invalid string length prefix")]
    InvalidStringLength,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("dictionary key is not a string")]
    DictKeyNotString,

    #[error("duplicate dictionary key")]
    DuplicateKey,

    #[error("trailing data after top-level value")]
    TrailingData,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

impl BencodeValue {
    /// Renders the value as a JSON-ish string for debugging.
    ///
    /// UTF-8 byte strings print quoted, non-UTF-8 byte strings print as
    /// quoted hex, dictionaries print in sorted key order so the output is
    /// deterministic.
    pub fn to_json(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        out
    }

    fn render(&self, out: &mut String) {
        match self {
            BencodeValue::String(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push('"');
                    for c in text.chars() {
                        match c {
                            '"' => out.push_str("\\\""),
                            '\\' => out.push_str("\\\\"),
                            '\n' => out.push_str("\\n"),
                            '\r' => out.push_str("\\r"),
                            '\t' => out.push_str("\\t"),
                            c if (c as u32) < 0x20 => {
                                out.push_str(&format!("\\u{:04x}", c as u32));
                            }
                            c => out.push(c),
                        }
                    }
                    out.push('"');
                }
                Err(_) => {
                    out.push('"');
                    out.push_str(&hex::encode(bytes));
                    out.push('"');
                }
            },
            BencodeValue::Integer(i) => out.push_str(&i.to_string()),
            BencodeValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.render(out);
                }
                out.push(']');
            }
            BencodeValue::Dict(dict) => {
                let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
                keys.sort_unstable();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    BencodeValue::String(key.clone()).render(out);
                    out.push(':');
                    dict[key].render(out);
                }
                out.push('}');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> BencodeValue {
        decode(input.as_bytes()).unwrap()
    }

    #[test]
    fn renders_string() {
        assert_eq!(parse("5:hello").to_json(), r#""hello""#);
    }

    #[test]
    fn renders_negative_integer() {
        assert_eq!(parse("i-42e").to_json(), "-42");
    }

    #[test]
    fn renders_list() {
        assert_eq!(parse("l5:helloi52ee").to_json(), r#"["hello",52]"#);
    }

    #[test]
    fn renders_dict_in_sorted_key_order() {
        assert_eq!(
            parse("d3:foo3:bar5:helloi52ee").to_json(),
            r#"{"foo":"bar","hello":52}"#
        );
    }

    #[test]
    fn renders_binary_string_as_hex() {
        let value = BencodeValue::String(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(value.to_json(), r#""deadbeef""#);
    }
}
