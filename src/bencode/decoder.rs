//! Strict single-pass bencode decoder.
//!
//! The decoder dispatches on the first byte of each value: `i` starts an
//! integer, `l` a list, `d` a dictionary, and an ASCII digit a
//! length-prefixed byte string. Anything else is malformed input.
use super::{BencodeError, BencodeResult, BencodeValue};
use std::collections::HashMap;

/// Decodes a complete bencoded value from `input`.
///
/// The whole slice must be consumed: trailing bytes after the top-level
/// value are an error, so a `.torrent` file with garbage appended is
/// rejected rather than silently truncated.
pub fn decode(input: &[u8]) -> BencodeResult<BencodeValue> {
    let mut decoder = Decoder::new(input);
    let value = decoder.decode_next()?;
    if decoder.remaining() > 0 {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn bump(&mut self) -> BencodeResult<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, n: usize) -> BencodeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(BencodeError::UnexpectedEof);
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consumes bytes up to (and including) `delimiter`, returning the
    /// bytes before it.
    fn take_until(&mut self, delimiter: u8) -> BencodeResult<&'a [u8]> {
        let start = self.pos;
        loop {
            if self.bump()? == delimiter {
                return Ok(&self.input[start..self.pos - 1]);
            }
        }
    }

    fn decode_next(&mut self) -> BencodeResult<BencodeValue> {
        match self.peek()? {
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list().map(BencodeValue::List),
            b'd' => self.decode_dict().map(BencodeValue::Dict),
            byte => Err(BencodeError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    /// `<length>:<bytes>` with a base-10 length and raw payload bytes.
    fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let digits = self.take_until(b':')?;
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(BencodeError::InvalidStringLength);
        }
        let length = std::str::from_utf8(digits)
            .expect("ascii digits")
            .parse::<usize>()
            .map_err(|_| BencodeError::InvalidStringLength)?;
        self.take(length).map(<[u8]>::to_vec)
    }

    /// `i<decimal>e`, rejecting empty literals, `-0`, and leading zeros.
    fn decode_integer(&mut self) -> BencodeResult<i64> {
        self.bump()?; // 'i'
        let digits = self.take_until(b'e')?;
        let literal =
            std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger)?;
        if literal.is_empty() || literal == "-0" {
            return Err(BencodeError::InvalidInteger);
        }
        let magnitude = literal.strip_prefix('-').unwrap_or(literal);
        if magnitude.len() > 1 && magnitude.starts_with('0') {
            return Err(BencodeError::InvalidInteger);
        }
        literal.parse::<i64>().map_err(|_| BencodeError::InvalidInteger)
    }

    /// `l<values>e`, recursing until the terminator.
    fn decode_list(&mut self) -> BencodeResult<Vec<BencodeValue>> {
        self.bump()?; // 'l'
        let mut list = Vec::new();
        while self.peek()? != b'e' {
            list.push(self.decode_next()?);
        }
        self.bump()?;
        Ok(list)
    }

    /// `d<key-value pairs>e`. Keys must be byte strings and unique.
    fn decode_dict(&mut self) -> BencodeResult<HashMap<Vec<u8>, BencodeValue>> {
        self.bump()?; // 'd'
        let mut dict = HashMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::DictKeyNotString);
            }
            let key = self.decode_string()?;
            let value = self.decode_next()?;
            if dict.insert(key, value).is_some() {
                return Err(BencodeError::DuplicateKey);
            }
        }
        self.bump()?;
        Ok(dict)
    }
}
