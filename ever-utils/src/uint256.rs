use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 256-bit value used for hashes and public keys. Hex encoded in text form
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UInt256([u8; 32]);

impl UInt256 {
    pub const ZERO: Self = Self([0; 32]);

    #[inline]
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        let len = std::cmp::min(data.len(), 32);
        bytes[..len].copy_from_slice(&data[..len]);
        Self(bytes)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for UInt256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for UInt256 {
    type Err = UInt256ParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| UInt256ParsingError::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UInt256({})", self)
    }
}

impl Serialize for UInt256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for UInt256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let data = String::deserialize(deserializer)?;
        UInt256::from_str(&data).map_err(|_| D::Error::custom("Invalid uint256"))
    }
}

#[derive(thiserror::Error, Debug, Copy, Clone)]
pub enum UInt256ParsingError {
    #[error("Invalid hex")]
    InvalidHex,
}
