//! Kalon addresses
//!
//! An address is 20 raw bytes, rendered as 40 lowercase hex characters
//! behind a network prefix (`kalon1` on main, `tkalon1` on test). The
//! zero address is reserved for the coinbase sender and an unset miner.

use crate::constants::{ADDRESS_HRP_MAIN, ADDRESS_HRP_TEST};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address length: expected 40 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex encoding")]
    InvalidHex,
}

/// 20-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The reserved zero address (coinbase `from`, unset miner)
    pub const fn zero() -> Self {
        Address([0u8; 20])
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether this is the reserved zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Bare 40-character lowercase hex form (no network prefix)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from text.
    ///
    /// Accepts the prefixed main form (`kalon1…`), the prefixed test
    /// form (`tkalon1…`), and bare 40-character hex.
    pub fn decode(text: &str) -> Result<Self, AddressError> {
        let hex_part = text
            .strip_prefix(ADDRESS_HRP_MAIN)
            .or_else(|| text.strip_prefix(ADDRESS_HRP_TEST))
            .unwrap_or(text);

        if hex_part.len() != 40 {
            return Err(AddressError::InvalidLength(hex_part.len()));
        }

        let bytes = hex::decode(hex_part).map_err(|_| AddressError::InvalidHex)?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ADDRESS_HRP_MAIN, self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::zero()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
