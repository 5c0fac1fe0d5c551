use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::uint256::UInt256;

/// Raw account address, `workchain:hex`
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    workchain: i8,
    account: UInt256,
}

impl Address {
    pub const fn new(workchain: i8, account: UInt256) -> Self {
        Self { workchain, account }
    }

    #[inline]
    pub fn workchain(&self) -> i8 {
        self.workchain
    }

    #[inline]
    pub fn account(&self) -> &UInt256 {
        &self.account
    }

    #[inline]
    pub fn is_masterchain(&self) -> bool {
        self.workchain == -1
    }
}

impl FromStr for Address {
    type Err = AddressParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (workchain, account) = s
            .split_once(':')
            .ok_or(AddressParsingError::InvalidFormat)?;

        let workchain = i8::from_str(workchain).map_err(|_| AddressParsingError::InvalidWorkchain)?;
        let account = UInt256::from_str(account).map_err(|_| AddressParsingError::InvalidAccount)?;

        Ok(Self { workchain, account })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, self.account)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let data = String::deserialize(deserializer)?;
        Address::from_str(&data).map_err(|_| D::Error::custom("Invalid address"))
    }
}

pub fn validate_address(address: &str) -> bool {
    Address::from_str(address).is_ok()
}

#[derive(thiserror::Error, Debug, Copy, Clone)]
pub enum AddressParsingError {
    #[error("Invalid address format")]
    InvalidFormat,
    #[error("Invalid workchain")]
    InvalidWorkchain,
    #[error("Invalid account id")]
    InvalidAccount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let raw = "-1:3333333333333333333333333333333333333333333333333333333333333333";
        let address = Address::from_str(raw).unwrap();
        assert!(address.is_masterchain());
        assert_eq!(address.to_string(), raw);

        assert!(!validate_address("0:123"));
        assert!(!validate_address(
            "3333333333333333333333333333333333333333333333333333333333333333"
        ));
    }

    #[test]
    fn serde_as_string_map_key() {
        let address = Address::new(0, UInt256::from_be_bytes([0x11; 32]));
        let mut map = std::collections::HashMap::new();
        map.insert(address, 1u8);

        let json = serde_json::to_string(&map).unwrap();
        let parsed: std::collections::HashMap<Address, u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get(&address), Some(&1));
    }
}
