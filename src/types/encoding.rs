//! Deterministic binary encoding for everything the VM persists.
//!
//! Program-tree nodes, scope tables, object records and realm counters all
//! go through [`Encode`] / [`Decode`]. Identical values always produce
//! identical bytes, which is what makes content hashes reproducible across
//! independent executions.
//!
//! # Format
//!
//! - Integers: little-endian, fixed width; `usize` is written as `u64`
//! - `bool`: one byte, 0 or 1
//! - `Vec<T>`, `String`, `BTreeMap<K, V>`: `u64` length prefix, then elements
//!   (maps in key order)
//! - `Option<T>`: tag byte 0 (None) or 1 (Some) followed by the value
//! - `Box<T>`: the inner value
//! - `[T; N]`: elements back to back, no prefix

use std::collections::BTreeMap;

/// Destination for encoded bytes.
///
/// Implemented by byte buffers, size counters and hashers, so a record can
/// be hashed without first being materialized as a buffer.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

/// Counts encoded bytes without storing them.
///
/// Used to pre-size buffers and to meter storage gas.
#[derive(Default)]
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self { len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// A value with a canonical binary form.
pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Encodes into a buffer of exactly the right capacity.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }

    /// Number of bytes [`Encode::to_bytes`] would produce.
    fn encoded_len(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        counter.len()
    }
}

/// Errors raised while decoding a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    UnexpectedEof,
    /// Bytes do not form a valid value (bad tag, bad UTF-8, trailing data).
    InvalidValue,
    /// A length prefix exceeds [`MAX_DECODE_LEN`].
    LengthOverflow,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::InvalidValue => write!(f, "invalid encoded value"),
            DecodeError::LengthOverflow => write!(f, "length prefix exceeds limit"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A value that can be read back from its canonical binary form.
pub trait Decode: Sized {
    /// Decodes one value, advancing `input` past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a complete buffer; trailing bytes are an error.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}

/// Upper bound on any decoded length prefix.
pub const MAX_DECODE_LEN: usize = 1_000_000;

fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

fn read_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    let bytes = read_bytes(input, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn read_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = usize::decode(input)?;
    if len > MAX_DECODE_LEN {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(len)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(read_bytes(input, 1)?[0])
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    Ok(<$t>::from_le_bytes(read_array(input)?))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64, i32, i64);

impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        usize::try_from(u64::decode(input)?).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_len(input)?;
        let mut vec = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_str().encode(out);
    }
}

impl Encode for str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_len(input)?;
        let bytes = read_bytes(input, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (**self).encode(out);
    }
}

impl<T: Encode> Encode for Box<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_ref().encode(out);
    }
}

impl<T: Decode> Decode for Box<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Box::new(T::decode(input)?))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for (k, v) in self {
            k.encode(out);
            v.encode(out);
        }
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_len(input)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::decode(input)?;
            let value = V::decode(input)?;
            // Keys must arrive strictly ascending so each map has one encoding.
            if map.last_key_value().is_some_and(|(last, _)| *last >= key) {
                return Err(DecodeError::InvalidValue);
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        read_array(input)
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x1234_5678u32.to_bytes(), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!((-1i64).to_bytes(), vec![0xFF; 8]);
        assert_eq!(i64::from_bytes(&(-42i64).to_bytes()).unwrap(), -42);
    }

    #[test]
    fn to_bytes_is_exactly_sized() {
        let value = vec![String::from("realm"), String::from("vm")];
        let bytes = value.to_bytes();
        assert_eq!(bytes.len(), value.encoded_len());
        assert_eq!(bytes.capacity(), bytes.len());
    }

    #[test]
    fn bool_rejects_other_bytes() {
        assert!(!bool::from_bytes(&[0]).unwrap());
        assert!(bool::from_bytes(&[1]).unwrap());
        assert_eq!(bool::from_bytes(&[2]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = 7u32.to_bytes();
        bytes.push(0);
        assert_eq!(u32::from_bytes(&bytes), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn truncated_input_is_eof() {
        let bytes = String::from("counter").to_bytes();
        assert_eq!(
            String::from_bytes(&bytes[..bytes.len() - 1]),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let bytes = ((MAX_DECODE_LEN + 1) as u64).to_bytes();
        assert_eq!(Vec::<u8>::from_bytes(&bytes), Err(DecodeError::LengthOverflow));
    }

    #[test]
    fn option_and_box_layout() {
        assert_eq!(None::<u8>.to_bytes(), vec![0]);
        assert_eq!(Some(9u8).to_bytes(), vec![1, 9]);
        assert_eq!(Box::new(5u16).to_bytes(), 5u16.to_bytes());
        assert_eq!(Option::<u8>::from_bytes(&[3, 0]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn map_encoding_is_canonical() {
        let mut map = BTreeMap::new();
        map.insert(String::from("b"), 2u64);
        map.insert(String::from("a"), 1u64);
        let bytes = map.to_bytes();
        assert_eq!(BTreeMap::<String, u64>::from_bytes(&bytes).unwrap(), map);

        // Same entries, descending order: must not decode.
        let mut out = Vec::new();
        2usize.encode(&mut out);
        "b".encode(&mut out);
        2u64.encode(&mut out);
        "a".encode(&mut out);
        1u64.encode(&mut out);
        assert_eq!(
            BTreeMap::<String, u64>::from_bytes(&out),
            Err(DecodeError::InvalidValue)
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut out = Vec::new();
        2usize.encode(&mut out);
        out.extend_from_slice(&[0xC3, 0x28]);
        assert_eq!(String::from_bytes(&out), Err(DecodeError::InvalidValue));
    }
}
