//! Core types shared by the marketplace ledgers
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for value)

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// On-ledger value, denominated in whole currency units
pub type Amount = Decimal;

/// Participant address (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address, never a valid party
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Check for the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| Error::Config(format!("Invalid address {}: {}", s, e)))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::Config(format!("Address {} must be 20 bytes", s)))?;
        Ok(Self(bytes))
    }
}

/// 32-byte record identifier (deliveries, payments)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; 32]);

impl RecordId {
    /// The zero identifier, rejected wherever a real id is expected
    pub const ZERO: RecordId = RecordId([0u8; 32]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check for the zero identifier
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| Error::Config(format!("Invalid record id {}: {}", s, e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config(format!("Record id {} must be 32 bytes", s)))?;
        Ok(Self(bytes))
    }
}

// Hex strings for human-readable formats (TOML, JSON), raw bytes for bincode.
macro_rules! impl_hex_serde {
    ($ty:ident, $len:literal) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.collect_str(self)
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(serde::de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

impl_hex_serde!(Address, 20);
impl_hex_serde!(RecordId, 32);

/// Opaque ciphertext plus proof, produced by the external encryption subsystem
///
/// The ledgers never look inside either blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    /// Ciphertext bytes
    pub ciphertext: Vec<u8>,
    /// Input proof bytes
    pub proof: Vec<u8>,
}

impl EncryptedInput {
    /// Create new input
    pub fn new(ciphertext: impl Into<Vec<u8>>, proof: impl Into<Vec<u8>>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            proof: proof.into(),
        }
    }

    /// Both blobs present
    pub fn is_present(&self) -> bool {
        !self.ciphertext.is_empty() && !self.proof.is_empty()
    }

    /// True when neither ciphertext nor proof was supplied
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty() && self.proof.is_empty()
    }

    /// Fail with `InvalidEncryptedPayload` naming `field` when a blob is empty
    pub fn ensure_present(&self, field: &'static str) -> Result<()> {
        if self.is_present() {
            Ok(())
        } else {
            Err(Error::InvalidEncryptedPayload(field))
        }
    }
}

/// Handle to a payload held by a [`ConfidentialStore`](crate::confidential::ConfidentialStore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedHandle([u8; 32]);

impl SealedHandle {
    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SealedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}
