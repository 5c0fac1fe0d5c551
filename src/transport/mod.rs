use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ever_utils::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::core::generic_contract::GenericContractSubscriptionHandler;
use crate::core::models::*;
use crate::core::token_wallet::TokenWalletSubscriptionHandler;
use crate::core::ton_wallet::{ContractType, TonWalletDetails, TonWalletSubscriptionHandler};

/// Ledger access capability. Wire formats are hidden behind it
#[async_trait]
pub trait Transport: Send + Sync {
    fn info(&self) -> TransportInfo;

    async fn get_contract_state(&self, address: &Address) -> Result<RawContractState>;

    /// Returns the latest shard block for the specified account
    async fn get_latest_block(&self, address: &Address) -> Result<LatestBlock>;

    /// Waits for the next shard block for the specified account, returns its id
    async fn wait_for_next_block(
        &self,
        current: &str,
        address: &Address,
        timeout: Duration,
    ) -> Result<String>;

    async fn subscribe_to_native_wallet(
        &self,
        clock: Arc<dyn Clock>,
        public_key: &UInt256,
        contract_type: ContractType,
        workchain: i8,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Result<Box<dyn WalletHandle>>;

    async fn subscribe_to_native_wallet_by_address(
        &self,
        clock: Arc<dyn Clock>,
        address: &Address,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Result<Box<dyn WalletHandle>>;

    /// Fails with [`TransportError::InvalidRootTokenContract`] if the root contract is not valid
    async fn subscribe_to_token_wallet(
        &self,
        clock: Arc<dyn Clock>,
        owner: &Address,
        root_token_contract: &Address,
        handler: Arc<dyn TokenWalletSubscriptionHandler>,
    ) -> Result<Box<dyn TokenWalletHandle>>;

    /// Returns `None` if there is no contract at the specified address
    async fn subscribe_to_generic_contract(
        &self,
        clock: Arc<dyn Clock>,
        address: &Address,
        handler: Arc<dyn GenericContractSubscriptionHandler>,
    ) -> Result<Option<Box<dyn GenericContractHandle>>>;

    /// Releases the underlying native resource
    fn free(&self);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub max_transactions_per_fetch: u8,
    pub reliable_behavior: ReliableBehavior,
}

/// Native subscription handle. Exclusively owned by one subscription
#[async_trait]
pub trait ContractHandle: Send + Sync {
    fn address(&self) -> &Address;

    fn polling_method(&self) -> PollingMethod;

    fn contract_state(&self) -> ContractState;

    /// Requests the latest state and transactions. Results are reported to the handler
    async fn refresh(&mut self, clock: &dyn Clock) -> Result<PollingMethod>;

    /// Processes the block with the specified id. Results are reported to the handler
    async fn handle_block(&mut self, block_id: &str) -> Result<PollingMethod>;

    /// Loads transactions older than `from_lt` and reports them as an old batch
    async fn preload_transactions(&mut self, from_lt: u64) -> Result<()>;

    /// Releases the underlying native resource
    fn free(self: Box<Self>);
}

#[async_trait]
pub trait WalletHandle: ContractHandle {
    fn public_key(&self) -> &UInt256;

    fn contract_type(&self) -> ContractType;

    fn details(&self) -> TonWalletDetails;

    async fn get_custodians(&self) -> Result<Vec<UInt256>>;

    async fn get_multisig_pending_transactions(&self) -> Result<Vec<MultisigPendingTransaction>>;

    async fn prepare_transfer(
        &self,
        clock: &dyn Clock,
        params: TransferParams,
    ) -> Result<TransferAction>;

    async fn estimate_fees(&self, message: &SignedMessage) -> Result<u128>;

    /// Sends the message and starts tracking it as a pending transaction
    async fn send(&mut self, message: &SignedMessage) -> Result<PendingTransaction>;
}

#[async_trait]
pub trait TokenWalletHandle: ContractHandle {
    fn owner(&self) -> &Address;

    fn symbol(&self) -> &Symbol;

    fn version(&self) -> TokenWalletVersion;

    fn balance(&self) -> BigUint;
}

#[async_trait]
pub trait GenericContractHandle: ContractHandle {
    async fn send(&mut self, message: &SignedMessage) -> Result<PendingTransaction>;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    pub destination: Address,
    #[serde(with = "serde_u64")]
    pub amount: u64,
    pub bounce: bool,
    /// Base64 encoded payload BOC
    pub body: Option<String>,
    pub expiration: Expiration,
}

/// Message prepared by the wallet handle. Signature is produced by the keystore
pub trait UnsignedMessage: Send + Sync {
    fn hash(&self) -> UInt256;

    fn expire_at(&self) -> u32;

    fn sign(&self, signature: &[u8; 64]) -> Result<SignedMessage>;
}

pub enum TransferAction {
    DeployFirst,
    Sign(Box<dyn UnsignedMessage>),
}

impl std::fmt::Debug for TransferAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeployFirst => f.write_str("DeployFirst"),
            Self::Sign(message) => f
                .debug_struct("Sign")
                .field("hash", &message.hash())
                .field("expire_at", &message.expire_at())
                .finish(),
        }
    }
}

#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransportError {
    #[error("Invalid root token contract")]
    InvalidRootTokenContract,
    #[error("Block walking is not supported by this transport")]
    BlockWalkingUnsupported,
}
