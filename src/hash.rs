//! # Content Hashing
//!
//! This module defines the content-addressing identifier used across the
//! whole engine and the rolling hasher used to verify chunks as they are
//! written to disk.
//!
//! ## Hash Format
//!
//! A `Hash` is a 28-byte SHA-224 digest. It identifies:
//!
//! - A chunk, by the digest of its contents
//! - A shared directory root, by a stable random identifier
//! - A peer, by the identifier it advertises on the network
//!
//! ## Verification
//!
//! Chunks are verified incrementally: a `Hasher` is fed every byte written
//! to a chunk, and the final digest must equal the hash announced by the
//! remote peer. A mismatch discards the transfer, never the file.

use std::fmt;

use anyhow::{anyhow, Result};
use boring::sha::Sha224;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::{ByteBuf, Bytes};

/// Size of a SHA-224 digest in bytes.
pub const HASH_SIZE: usize = 28;

/// A 28-byte content digest, comparable and usable as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Build a hash from its raw bytes.
    pub fn new(bytes: [u8; HASH_SIZE]) -> Hash {
        Hash(bytes)
    }

    /// Build a hash from a byte slice.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Raw digest bytes, must be exactly `HASH_SIZE` long.
    ///
    pub fn from_slice(bytes: &[u8]) -> Result<Hash> {
        if bytes.len() != HASH_SIZE {
            return Err(anyhow!("invalid hash length: {}", bytes.len()));
        }
        let mut buf = [0; HASH_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Hash(buf))
    }

    /// Digest a complete buffer in one pass.
    pub fn of(data: &[u8]) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight hex digits are enough to tell hashes apart in the logs
        for byte in &self.0[0..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Bytes::new(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let bytes = ByteBuf::deserialize(deserializer)?;
        Hash::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Rolling SHA-224 digest over a single chunk.
///
/// Fed incrementally as bytes are written through the cache, so resuming a
/// partial chunk only requires re-reading the bytes already on disk.
pub struct Hasher {
    inner: Sha224,
}

impl Hasher {
    /// Start a new rolling digest.
    pub fn new() -> Hasher {
        Hasher {
            inner: Sha224::new(),
        }
    }

    /// Feed bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Read the final digest.
    pub fn finish(self) -> Hash {
        Hash(self.inner.finish())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Hasher::new()
    }
}
