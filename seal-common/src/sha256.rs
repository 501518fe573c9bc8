//! A convenience module for hashing things with SHA-256.
//!
//! Vault content hashes and idempotency key digests go through here.

use std::{fmt, str::FromStr};

use ring::digest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::hex;

pub const HASH_LEN: usize = 32;

/// A SHA-256 hash value.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct Hash([u8; HASH_LEN]);

/// SHA-256 digest a single input.
pub fn digest(input: &[u8]) -> Hash {
    digest_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating.
pub fn digest_many(inputs: &[&[u8]]) -> Hash {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for input in inputs {
        ctx.update(input);
    }
    Hash::from_ring(ctx.finish())
}

impl Hash {
    pub const fn new(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }

    fn from_ring(output: digest::Digest) -> Self {
        Self(<[u8; HASH_LEN]>::try_from(output.as_ref()).unwrap())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&hex::display(&self.0), f)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl FromStr for Hash {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr = <[u8; HASH_LEN]>::try_from(bytes.as_slice())
            .map_err(|_| anyhow::anyhow!("sha256 hash must be 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// Serializes as a lowercase hex string.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // sanity check
    #[test]
    fn test_sha256() {
        let actual = digest(b"").to_hex();
        let expected =
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(&actual, expected);
    }

    #[test]
    fn hex_roundtrip() {
        let hash = digest(b"seal");
        let parsed = Hash::from_str(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn digest_many_matches_concat() {
        assert_eq!(digest_many(&[b"ab", b"cd"]), digest(b"abcd"));
    }
}
