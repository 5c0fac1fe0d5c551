use std::str::FromStr;

use serde::{Deserialize, Serialize};

ever_utils::define_string_enum!(
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub enum MultisigType {
        SafeMultisigWallet,
        SafeMultisigWallet24h,
        SetcodeMultisigWallet,
        SetcodeMultisigWallet24h,
        BridgeMultisigWallet,
        SurfWallet,
        Multisig2,
        Multisig2_1,
    }
);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ContractType {
    Multisig(MultisigType),
    WalletV3,
    WalletV4R1,
    WalletV4R2,
    WalletV5R1,
    HighloadWalletV2,
    EverWallet,
}

impl ContractType {
    /// Whether the wallet has a list of custodians
    pub fn supports_custodians(&self) -> bool {
        matches!(self, Self::Multisig(_) | Self::EverWallet)
    }

    /// Whether the wallet can have unconfirmed transactions
    pub fn is_multisig(&self) -> bool {
        matches!(self, Self::Multisig(_))
    }
}

impl FromStr for ContractType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "WalletV3" => Self::WalletV3,
            "WalletV4R1" => Self::WalletV4R1,
            "WalletV4R2" => Self::WalletV4R2,
            "WalletV5R1" => Self::WalletV5R1,
            "HighloadWalletV2" => Self::HighloadWalletV2,
            "EverWallet" => Self::EverWallet,
            s => Self::Multisig(MultisigType::from_str(s)?),
        })
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &'_ mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::WalletV3 => f.write_str("WalletV3"),
            Self::WalletV4R1 => f.write_str("WalletV4R1"),
            Self::WalletV4R2 => f.write_str("WalletV4R2"),
            Self::WalletV5R1 => f.write_str("WalletV5R1"),
            Self::HighloadWalletV2 => f.write_str("HighloadWalletV2"),
            Self::EverWallet => f.write_str("EverWallet"),
            Self::Multisig(multisig_type) => f.write_str(multisig_type.as_str()),
        }
    }
}

impl Serialize for ContractType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContractType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let data = String::deserialize(deserializer)?;
        ContractType::from_str(&data).map_err(|_| D::Error::custom("Invalid contract type"))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TonWalletDetails {
    pub requires_separate_deploy: bool,
    #[serde(with = "ever_utils::serde_u64")]
    pub min_amount: u64,
    pub max_messages: usize,
    pub supports_payload: bool,
    pub supports_state_init: bool,
    pub supports_multiple_owners: bool,
    pub supports_code_update: bool,
    pub expiration_time: u32,
    pub required_confirmations: Option<u8>,
}
