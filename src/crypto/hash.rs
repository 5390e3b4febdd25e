use sha2::{Sha256, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn double_hash(data: &[u8]) -> Self {
        let first_hash = Self::hash(data);
        Self::hash(first_hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Number of leading zero bits when read as a big-endian 256-bit integer.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut bits = 0;
        for byte in &self.0 {
            if *byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }

        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental SHA-256 over the canonical encoding used for hash identity.
///
/// Integers are fixed-width big-endian, booleans one byte, and every byte
/// string or sequence is preceded by a u32 big-endian length.
#[derive(Clone, Default)]
pub struct HashWriter {
    hasher: Sha256,
}

impl HashWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.hasher.update([value]);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn put_len(&mut self, len: usize) -> &mut Self {
        self.put_u32(len as u32)
    }

    pub fn put_hash(&mut self, hash: &Hash256) -> &mut Self {
        self.hasher.update(hash.as_bytes());
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_len(bytes.len());
        self.hasher.update(bytes);
        self
    }

    pub fn finish(self) -> Hash256 {
        Hash256(self.hasher.finalize().into())
    }
}

// RIPEMD160 hash for address rendering
use ripemd::Ripemd160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash160([u8; 20]);

impl Hash160 {
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Ripemd160::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn hash_sha256(data: &[u8]) -> Self {
        let sha256_hash = Hash256::hash(data);
        Self::hash(sha256_hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
