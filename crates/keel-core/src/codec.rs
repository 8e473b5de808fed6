//! Canonical binary encoding for everything that gets hashed or signed.
//!
//! Headers arrive from relays as packed bytes, and every digest in this crate
//! (header digest, schedule hash, PBFT message digest, receipt digest) is a
//! SHA256 over this exact encoding. The layout follows the remote chain:
//!
//! - fixed-width integers are little-endian
//! - sequence lengths are LEB128 `varuint32`
//! - `Option<T>` is a one-byte `0`/`1` tag followed by the value
//! - 32-byte digests are written raw, without a length prefix
//! - keys and signatures carry a `varuint32` type tag (`0` = secp256k1)

use crate::types::primitives::Digest;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Errors raised while decoding packed data from an untrusted relay.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of input: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid varuint32 at offset {offset}: encoding exceeds 32 bits")]
    InvalidVarint { offset: usize },

    #[error("Invalid option tag {tag} at offset {offset}: expected 0 or 1")]
    InvalidOptionTag { offset: usize, tag: u8 },

    #[error("Invalid bool byte {value} at offset {offset}")]
    InvalidBool { offset: usize, value: u8 },

    #[error("Unsupported {what} type {tag}: only secp256k1 (0) is accepted")]
    UnsupportedKeyType { what: &'static str, tag: u32 },

    #[error("Unknown {what} variant {tag}")]
    UnknownVariant { what: &'static str, tag: u32 },

    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("Trailing bytes after decoding: {remaining} bytes left")]
    TrailingBytes { remaining: usize },
}

/// A value with a canonical packed representation.
pub trait Pack {
    fn pack(&self, out: &mut Vec<u8>);
}

/// A value that can be decoded from its canonical packed representation.
pub trait Unpack: Sized {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Pack a value into a fresh buffer.
pub fn pack<T: Pack + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.pack(&mut out);
    out
}

/// Decode a value, rejecting any bytes left over after it.
pub fn unpack<T: Unpack>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut reader = Reader::new(bytes);
    let value = T::unpack(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(CodecError::TrailingBytes {
            remaining: reader.remaining(),
        });
    }
    Ok(value)
}

/// SHA256 of the packed form of a value.
pub fn digest_of<T: Pack + ?Sized>(value: &T) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(pack(value));
    hasher.finalize().into()
}

/// Cursor over a packed byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                offset: self.offset,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_varuint32(&mut self) -> Result<u32, CodecError> {
        let start = self.offset;
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return Err(CodecError::InvalidVarint { offset: start });
            }
        }
        u32::try_from(value).map_err(|_| CodecError::InvalidVarint { offset: start })
    }
}

/// Append a LEB128 `varuint32`.
pub fn pack_varuint32(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// A length-prefixed sequence length. Sequences longer than `u32::MAX` cannot
/// be produced by the remote chain.
fn pack_len(len: usize, out: &mut Vec<u8>) {
    pack_varuint32(len as u32, out);
}

macro_rules! impl_le_int {
    ($($ty:ty),*) => {
        $(
            impl Pack for $ty {
                fn pack(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Unpack for $ty {
                fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
                    Ok(<$ty>::from_le_bytes(reader.read_array()?))
                }
            }
        )*
    };
}

impl_le_int!(u8, u16, u32, u64);

impl Pack for bool {
    fn pack(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl Unpack for bool {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let offset = reader.offset();
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(CodecError::InvalidBool { offset, value }),
        }
    }
}

impl Pack for [u8; 32] {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Unpack for [u8; 32] {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        reader.read_array()
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, out: &mut Vec<u8>) {
        self.as_slice().pack(out);
    }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, out: &mut Vec<u8>) {
        pack_len(self.len(), out);
        for item in self {
            item.pack(out);
        }
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = reader.read_varuint32()? as usize;
        // Every element takes at least one byte; never pre-allocate past the input.
        let mut items = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            items.push(T::unpack(reader)?);
        }
        Ok(items)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, out: &mut Vec<u8>) {
        match self {
            Some(value) => {
                out.push(1);
                value.pack(out);
            }
            None => out.push(0),
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let offset = reader.offset();
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::unpack(reader)?)),
            tag => Err(CodecError::InvalidOptionTag { offset, tag }),
        }
    }
}

impl<A: Pack, B: Pack> Pack for (A, B) {
    fn pack(&self, out: &mut Vec<u8>) {
        self.0.pack(out);
        self.1.pack(out);
    }
}

impl<A: Unpack, B: Unpack> Unpack for (A, B) {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok((A::unpack(reader)?, B::unpack(reader)?))
    }
}

impl Pack for String {
    fn pack(&self, out: &mut Vec<u8>) {
        self.as_str().pack(out);
    }
}

impl Pack for str {
    fn pack(&self, out: &mut Vec<u8>) {
        pack_len(self.len(), out);
        out.extend_from_slice(self.as_bytes());
    }
}

impl Unpack for String {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = reader.read_varuint32()? as usize;
        let offset = reader.offset();
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { offset })
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, out: &mut Vec<u8>) {
        (**self).pack(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varuint32_encoding() {
        let mut out = Vec::new();
        pack_varuint32(0, &mut out);
        assert_eq!(out, vec![0x00]);

        out.clear();
        pack_varuint32(127, &mut out);
        assert_eq!(out, vec![0x7f]);

        out.clear();
        pack_varuint32(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);

        let mut reader = Reader::new(&out);
        assert_eq!(reader.read_varuint32().unwrap(), 300);
    }

    #[test]
    fn test_varuint32_overflow_rejected() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut reader = Reader::new(&bytes);
        assert!(matches!(
            reader.read_varuint32(),
            Err(CodecError::InvalidVarint { offset: 0 })
        ));
    }

    #[test]
    fn test_integers_are_little_endian() {
        assert_eq!(pack(&0x0102_0304u32), vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(pack(&0x0102u16), vec![0x02, 0x01]);
    }

    #[test]
    fn test_option_and_vec_layout() {
        let value: Option<Vec<u16>> = Some(vec![1, 2]);
        assert_eq!(pack(&value), vec![0x01, 0x02, 0x01, 0x00, 0x02, 0x00]);
        assert_eq!(pack(&None::<u32>), vec![0x00]);
    }

    #[test]
    fn test_unpack_rejects_trailing_bytes() {
        let result = unpack::<u16>(&[0x01, 0x00, 0xff]);
        assert!(matches!(
            result,
            Err(CodecError::TrailingBytes { remaining: 1 })
        ));
    }

    #[test]
    fn test_unpack_truncated_input() {
        let result = unpack::<u32>(&[0x01, 0x02]);
        assert!(matches!(
            result,
            Err(CodecError::UnexpectedEof { needed: 4, available: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_option_tag() {
        let result = unpack::<Option<u8>>(&[0x02, 0x00]);
        assert!(matches!(
            result,
            Err(CodecError::InvalidOptionTag { tag: 2, .. })
        ));
    }

    #[test]
    fn test_huge_declared_length_does_not_allocate() {
        // Claims u32::MAX elements but provides none.
        let bytes = [0xff, 0xff, 0xff, 0xff, 0x0f];
        assert!(matches!(
            unpack::<Vec<u64>>(&bytes),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }
}
