use std::cmp::Ordering;

use ever_utils::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

#[non_exhaustive]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum TransactionAdditionalInfo {
    /// Transaction with incoming message, which body is valid UTF-8 comment
    Comment(String),
    /// User interaction with wallet contract
    WalletInteraction(WalletInteractionInfo),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletInteractionInfo {
    pub recipient: Option<Address>,
    pub method: WalletInteractionMethod,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum WalletInteractionMethod {
    WalletV3Transfer,
    Multisig(Box<MultisigTransaction>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "data")]
pub enum MultisigTransaction {
    Send(MultisigSendTransaction),
    Submit(MultisigSubmitTransaction),
    Confirm(MultisigConfirmTransaction),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Copy)]
#[serde(rename_all = "camelCase")]
pub struct MultisigConfirmTransaction {
    pub custodian: UInt256,
    #[serde(with = "serde_u64")]
    pub transaction_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigSubmitTransaction {
    pub custodian: UInt256,
    pub dest: Address,
    #[serde(with = "serde_string")]
    pub value: BigUint,
    pub bounce: bool,
    pub all_balance: bool,
    /// Zero for transfers executed immediately
    #[serde(with = "serde_u64")]
    pub trans_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigSendTransaction {
    pub dest: Address,
    #[serde(with = "serde_string")]
    pub value: BigUint,
    pub bounce: bool,
    pub flags: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigPendingTransaction {
    #[serde(with = "serde_u64")]
    pub id: u64,
    pub confirmations: Vec<UInt256>,
    pub signs_required: u8,
    pub signs_received: u8,
    pub creator: UInt256,
    pub index: u8,
    pub dest: Address,
    #[serde(with = "serde_string")]
    pub value: BigUint,
    pub send_flags: u16,
    pub bounce: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum TokenWalletTransaction {
    IncomingTransfer(TokenIncomingTransfer),
    OutgoingTransfer(TokenOutgoingTransfer),
    Accept(#[serde(with = "serde_string")] BigUint),
    TransferBounced(#[serde(with = "serde_string")] BigUint),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIncomingTransfer {
    #[serde(with = "serde_string")]
    pub tokens: BigUint,
    /// Not the address of the token wallet, but the address of its owner
    pub sender_address: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutgoingTransfer {
    pub to: TransferRecipient,
    #[serde(with = "serde_string")]
    pub tokens: BigUint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "address")]
pub enum TransferRecipient {
    OwnerWallet(Address),
    TokenWallet(Address),
}

ever_utils::define_string_enum!(
    #[derive(Debug, Copy, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
    pub enum PollingMethod {
        /// Manual polling once a minute or by a click.
        /// Used when there are no pending transactions
        Manual,
        /// Block-walking for GQL or fast refresh for other transports.
        /// Used when there are some pending transactions
        Reliable,
    }
);

ever_utils::define_string_enum!(
    #[derive(Debug, Copy, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
    pub enum ReliableBehavior {
        /// Used for transports which doesn't support getting blocks directly (JRPC, proto)
        IntensivePolling,
        /// Used for transports which support getting blocks directly (GQL)
        BlockWalking,
    }
);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "value")]
pub enum Expiration {
    /// Message will never be expired. Not recommended to use
    Never,
    /// Interval after which the message will be invalid.
    /// Expiration timestamp should be refreshed as close to
    /// signing as possible
    Timeout(u32),
    /// The specific moment in time. Will stay the same after each
    /// refresh
    Timestamp(u32),
}

impl Expiration {
    pub fn timestamp(&self, clock: &dyn Clock) -> u32 {
        match self {
            Self::Never => u32::MAX,
            Self::Timeout(timeout) => (clock.now_sec_u64() as u32).saturating_add(*timeout),
            &Self::Timestamp(timestamp) => timestamp,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    /// Full name
    pub name: String,

    /// Short name, e.g. USDT, DAI, etc.
    pub symbol: String,

    /// Fixed decimals count
    pub decimals: u8,

    /// Address of the root token contract
    pub root_token_contract: Address,
}

ever_utils::define_string_enum!(
    #[derive(Debug, Copy, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
    pub enum TokenWalletVersion {
        /// Fourth iteration of the old token wallets
        OldTip3v4,
        /// Standard TIP-3.1 token wallets
        Tip3,
        /// TON jetton wallets
        Jetton,
    }
);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractState {
    /// Logical time of the last transaction on this account
    #[serde(with = "serde_lt")]
    pub last_lt: u64,
    /// Full account balance in nano EVER
    #[serde(with = "serde_u64")]
    pub balance: u64,
    /// At what point was this state obtained
    pub gen_timings: GenTimings,
    /// Last transaction id
    pub last_transaction_id: Option<LastTransactionId>,
    /// Whether the contract is deployed
    pub is_deployed: bool,
    /// Hash of the contract code, if deployed
    pub code_hash: Option<UInt256>,
}

impl PartialEq for ContractState {
    fn eq(&self, other: &Self) -> bool {
        self.last_transaction_id == other.last_transaction_id
            && self.is_deployed == other.is_deployed
            && self.code_hash == other.code_hash
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum GenTimings {
    /// There is no way to determine the point in time at which this specific state was obtained
    Unknown,
    /// There is a known point in time at which this specific state was obtained
    Known {
        #[serde(with = "serde_lt")]
        gen_lt: u64,
        gen_utime: u32,
    },
}

impl Default for GenTimings {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Full contract state as returned by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RawContractState {
    NotExists { timings: GenTimings },
    Exists(ExistingContract),
}

impl RawContractState {
    pub fn brief(&self) -> ContractState {
        match self {
            Self::NotExists { .. } => ContractState::default(),
            Self::Exists(state) => state.brief,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingContract {
    #[serde(flatten)]
    pub brief: ContractState,
    /// Serialized account state (base64 BOC)
    pub boc: String,
}

/// Pending external message, waiting for execution
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    /// External message hash
    pub message_hash: UInt256,
    /// Incoming message source
    pub src: Option<Address>,
    /// Expiration timestamp, unixtime
    pub expire_at: u32,
}

/// Message signed by the keystore, ready to be sent
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    /// Message hash
    pub hash: UInt256,
    /// Expiration timestamp, unixtime
    pub expire_at: u32,
    /// Base64 encoded message BOC
    pub boc: String,
}

/// Transaction with additional data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionWithData<T> {
    pub transaction: Transaction,
    pub data: Option<T>,
}

impl<T> AsRef<Transaction> for TransactionWithData<T> {
    fn as_ref(&self) -> &Transaction {
        &self.transaction
    }
}

pub type TonWalletTransaction = TransactionWithData<TransactionAdditionalInfo>;
pub type TokenWalletTransactionWithData = TransactionWithData<TokenWalletTransaction>;

ever_utils::define_string_enum!(
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub enum TransactionsBatchType {
        Old,
        New,
    }
);

impl Serialize for TransactionsBatchType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(match self {
            Self::Old => "old",
            Self::New => "new",
        })
    }
}

impl<'de> Deserialize<'de> for TransactionsBatchType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        match String::deserialize(deserializer)?.as_str() {
            "old" => Ok(Self::Old),
            "new" => Ok(Self::New),
            _ => Err(D::Error::custom("Invalid batch type")),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsBatchInfo {
    /// The smallest lt in a group
    #[serde(with = "serde_lt")]
    pub min_lt: u64,
    /// Maximum lt in a group
    #[serde(with = "serde_lt")]
    pub max_lt: u64,
    /// Whether this batch contains new or already known transactions
    pub batch_type: TransactionsBatchType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Full transaction id
    pub id: TransactionId,
    /// Previous transaction id. `None` for last transaction
    pub prev_trans_id: Option<TransactionId>,
    /// Transaction unix timestamp
    pub created_at: u32,
    /// Whether transaction execution was unsuccessful
    pub aborted: bool,
    /// Action phrase exit code. `None` if action phase was skipped
    pub result_code: Option<i32>,
    /// Account status before transaction execution
    pub orig_status: AccountStatus,
    /// Account status after transaction execution
    pub end_status: AccountStatus,
    /// Sum of fees from all execution stages
    #[serde(with = "serde_u64")]
    pub total_fees: u64,
    /// Incoming message
    pub in_msg: Message,
    /// Outgoing messages
    pub out_msgs: Vec<Message>,
}

impl AsRef<Transaction> for Transaction {
    fn as_ref(&self) -> &Transaction {
        self
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Account exists and has a positive balance
    Uninit,
    /// Account exists, but is frozen
    Frozen,
    /// Account exists, has a deployed contract code and has a positive balance
    Active,
    /// Account doesn't exist
    Nonexist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message hash
    pub hash: UInt256,

    /// Source message address, `None` for external messages
    pub src: Option<Address>,

    /// Destination message address, `None` for outbound messages
    pub dst: Option<Address>,

    /// Message value in nano EVER
    #[serde(with = "serde_u64")]
    pub value: u64,

    /// Message body
    pub body: Option<MessageBody>,

    /// Whether this message will be bounced on unsuccessful execution.
    pub bounce: bool,

    /// Whether this message was bounced during unsuccessful execution.
    /// Only relevant for internal messages
    pub bounced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    /// Hash of body in cell representation
    pub hash: UInt256,
    /// Base64 encoded message body
    pub data: String,
}

#[derive(Debug, Copy, Clone, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "data")]
pub enum LastTransactionId {
    Exact(TransactionId),
    Inexact {
        #[serde(with = "serde_lt")]
        latest_lt: u64,
    },
}

impl LastTransactionId {
    fn lt(&self) -> u64 {
        match self {
            Self::Exact(id) => id.lt,
            Self::Inexact { latest_lt } => *latest_lt,
        }
    }
}

impl PartialEq for LastTransactionId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(left), Self::Exact(right)) => left == right,
            (Self::Inexact { latest_lt: left }, Self::Inexact { latest_lt: right }) => {
                left == right
            }
            _ => false,
        }
    }
}

impl PartialOrd for LastTransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LastTransactionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lt().cmp(&other.lt())
    }
}

#[derive(Debug, Copy, Clone, Eq, Serialize, Deserialize)]
pub struct TransactionId {
    #[serde(with = "serde_lt")]
    pub lt: u64,
    pub hash: UInt256,
}

impl PartialEq for TransactionId {
    fn eq(&self, other: &Self) -> bool {
        self.lt == other.lt
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lt.cmp(&other.lt)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlock {
    pub id: String,
    #[serde(with = "serde_lt")]
    pub end_lt: u64,
    pub gen_utime: u32,
}
