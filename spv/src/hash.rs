//! Double SHA-256 and the internal/display byte-order boundary.
//!
//! Bitcoin shows every 32-byte hash reversed ("display order"); the wire
//! format, Merkle tree and header linkage all use the direct digest
//! ("internal order"). [`Hash256`] pins a value to internal order so the
//! conversion happens exactly once, at the RPC boundary.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// `sha256(sha256(data))`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

#[derive(Debug, Error, PartialEq)]
pub enum HashHexError {
    #[error("hash hex must be 64 characters, got {0}")]
    Length(usize),
    #[error("invalid hash hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// A 32-byte hash in internal byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const fn from_internal(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Double-SHA-256 of `data`, already in internal order.
    pub fn digest(data: &[u8]) -> Self {
        Self(sha256d(data))
    }

    /// Parse a display-order hex string (as emitted by `bitcoind` and
    /// block explorers), reversing it into internal order.
    pub fn from_display_hex(s: &str) -> Result<Self, HashHexError> {
        if s.len() != 64 {
            return Err(HashHexError::Length(s.len()));
        }
        let raw = hex::decode(s)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        bytes.reverse();
        Ok(Self(bytes))
    }

    /// Display-order hex, the form users and RPC interfaces expect.
    pub fn to_display_hex(&self) -> String {
        let mut rev = self.0;
        rev.reverse();
        hex::encode(rev)
    }

    /// Internal-order hex, the form Merkle trees and headers carry.
    pub fn to_internal_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", self.to_display_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_reference_vectors() {
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        assert_eq!(
            hex::encode(sha256d(b"test")),
            "954d5a49fd70d9b8bcdb35d252267829957f7ef7fa6c74f88419bdc5e82209f4"
        );
    }

    #[test]
    fn display_hex_round_trips_through_reversal() {
        let display = "00000000000002ee8b7a2baff6fc9366166d75b97301a68b0eceb3bf60f38d8f";
        let hash = Hash256::from_display_hex(display).unwrap();
        assert_eq!(hash.to_display_hex(), display);
        // internal order is the exact byte reversal
        let mut internal = hex::decode(display).unwrap();
        internal.reverse();
        assert_eq!(hash.as_bytes().as_slice(), internal.as_slice());
    }

    #[test]
    fn display_hex_rejects_bad_input() {
        assert_eq!(
            Hash256::from_display_hex("abcd"),
            Err(HashHexError::Length(4))
        );
        assert!(matches!(
            Hash256::from_display_hex(&"zz".repeat(32)),
            Err(HashHexError::Hex(_))
        ));
    }
}
