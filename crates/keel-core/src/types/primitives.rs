use crate::codec::{pack_varuint32, CodecError, Pack, Reader, Unpack};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 256-bit SHA256 digest.
pub type Digest = [u8; 32];

/// A block id: the header digest with the block number in its first 4 bytes.
pub type BlockId = [u8; 32];

/// Identifies the remote chain; bound into every PBFT message digest.
pub type ChainId = [u8; 32];

/// Number of bytes in a compressed secp256k1 public key.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Number of bytes in a compact recoverable signature (header byte + r + s).
pub const SIGNATURE_LEN: usize = 65;

/// Type tag used on the wire for secp256k1 keys and signatures.
const K1_TYPE_TAG: u32 = 0;

/// A compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err("Invalid public key length");
        }
        let mut arr = [0u8; PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl Pack for PublicKey {
    fn pack(&self, out: &mut Vec<u8>) {
        pack_varuint32(K1_TYPE_TAG, out);
        out.extend_from_slice(&self.0);
    }
}

impl Unpack for PublicKey {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let tag = reader.read_varuint32()?;
        if tag != K1_TYPE_TAG {
            return Err(CodecError::UnsupportedKeyType {
                what: "public key",
                tag,
            });
        }
        Ok(Self(reader.read_array()?))
    }
}

/// A compact recoverable secp256k1 signature.
/// Byte 0 is the recovery header (`27 + 4 + recovery_id` for compressed keys),
/// followed by the 32-byte `r` and 32-byte `s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != SIGNATURE_LEN {
            return Err("Invalid signature length");
        }
        let mut arr = [0u8; SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_LEN])
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl Pack for Signature {
    fn pack(&self, out: &mut Vec<u8>) {
        pack_varuint32(K1_TYPE_TAG, out);
        out.extend_from_slice(&self.0);
    }
}

impl Unpack for Signature {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let tag = reader.read_varuint32()?;
        if tag != K1_TYPE_TAG {
            return Err(CodecError::UnsupportedKeyType {
                what: "signature",
                tag,
            });
        }
        Ok(Self(reader.read_array()?))
    }
}

/// Errors parsing an account name from its string form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Name '{0}' is longer than 13 characters")]
    TooLong(String),

    #[error("Name '{name}' contains invalid character '{ch}'")]
    InvalidCharacter { name: String, ch: char },

    #[error("Name '{0}': the 13th character must be one of .12345abcdefghij")]
    InvalidThirteenthCharacter(String),
}

const NAME_CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// An account name on the remote chain: up to 13 characters of
/// `.12345a-z` packed into a `u64`, 5 bits per character (4 for the 13th).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(pub u64);

impl Name {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some(u64::from(c - b'a') + 6),
        b'1'..=b'5' => Some(u64::from(c - b'1') + 1),
        b'.' => Some(0),
        _ => None,
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(NameError::TooLong(s.to_string()));
        }

        let mut value: u64 = 0;
        for (i, &c) in bytes.iter().enumerate() {
            let symbol = char_to_symbol(c).ok_or_else(|| NameError::InvalidCharacter {
                name: s.to_string(),
                ch: c as char,
            })?;
            if i < 12 {
                value |= (symbol & 0x1f) << (64 - 5 * (i + 1));
            } else {
                if symbol > 0x0f {
                    return Err(NameError::InvalidThirteenthCharacter(s.to_string()));
                }
                value |= symbol;
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let mask = if i == 0 { 0x0f } else { 0x1f };
            chars[12 - i] = NAME_CHARMAP[(tmp & mask) as usize];
            tmp >>= if i == 0 { 4 } else { 5 };
        }
        let len = chars
            .iter()
            .rposition(|&c| c != b'.')
            .map(|p| p + 1)
            .unwrap_or(0);
        // Every byte comes from NAME_CHARMAP, which is ASCII.
        f.write_str(std::str::from_utf8(&chars[..len]).map_err(|_| fmt::Error)?)
    }
}

impl Serialize for Name {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Pack for Name {
    fn pack(&self, out: &mut Vec<u8>) {
        self.0.pack(out);
    }
}

impl Unpack for Name {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self(u64::unpack(reader)?))
    }
}

/// Hex (de)serialization for variable-length byte fields.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Hex (de)serialization for 32-byte digests and ids.
pub mod hex_digest {
    use super::{parse_digest, Digest};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Digest, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_digest(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a hex-encoded 32-byte digest, with or without `0x` prefix.
pub fn parse_digest(hex_str: &str) -> Result<Digest, String> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    if hex_str.len() != 64 {
        return Err(format!("Expected 64 hex characters, got {}", hex_str.len()));
    }
    let bytes = hex::decode(hex_str).map_err(|e| format!("Invalid hex: {}", e))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
