use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ever_utils::*;
use num_bigint::BigUint;
use parking_lot::Mutex;

use super::connection_controller::{
    ConnectionController, ConnectionControllerConfig, ConnectionData, ConnectionKind,
};
use super::generic_contract::GenericContractSubscriptionHandler;
use super::models::*;
use super::token_wallet::TokenWalletSubscriptionHandler;
use super::ton_wallet::{ContractType, TonWalletDetails, TonWalletSubscriptionHandler};
use crate::external::{ConnectionFactory, KeyStore, KeyStoreEntry, NetworkConnection, TimeSource};
use crate::transport::*;

pub fn test_address(n: u8) -> Address {
    Address::new(0, UInt256::from_be_bytes([n; 32]))
}

pub fn test_key(n: u8) -> UInt256 {
    UInt256::from_be_bytes([n; 32])
}

pub fn test_hash(n: u8) -> UInt256 {
    let mut hash = [n; 32];
    hash[0] = 0xff;
    UInt256::from_be_bytes(hash)
}

pub fn preset(id: u32, group: &str) -> ConnectionData {
    ConnectionData {
        id,
        name: format!("{group} #{id}"),
        group: group.to_owned(),
        kind: ConnectionKind::Jrpc {
            endpoint: format!("https://jrpc-{id}.local/rpc"),
        },
        probe_address: None,
    }
}

pub fn test_signed_message(n: u8, expire_at: u32) -> SignedMessage {
    SignedMessage {
        hash: test_hash(n),
        expire_at,
        boc: String::new(),
    }
}

pub fn test_transaction(lt: u64, in_msg_hash: UInt256) -> Transaction {
    Transaction {
        id: TransactionId {
            lt,
            hash: UInt256::from_be_bytes([(lt % 256) as u8; 32]),
        },
        prev_trans_id: None,
        created_at: 1_600_000_000 + lt as u32,
        aborted: false,
        result_code: Some(0),
        orig_status: AccountStatus::Active,
        end_status: AccountStatus::Active,
        total_fees: 1000,
        in_msg: Message {
            hash: in_msg_hash,
            ..Default::default()
        },
        out_msgs: Vec::new(),
    }
}

pub fn test_wallet_transaction(lt: u64, in_msg_hash: UInt256) -> TonWalletTransaction {
    TransactionWithData {
        transaction: test_transaction(lt, in_msg_hash),
        data: None,
    }
}

pub fn test_token_transaction(lt: u64) -> TokenWalletTransactionWithData {
    TransactionWithData {
        transaction: test_transaction(lt, UInt256::default()),
        data: Some(TokenWalletTransaction::Accept(BigUint::from(lt))),
    }
}

pub fn test_multisig_pending_transaction(id: u64) -> MultisigPendingTransaction {
    MultisigPendingTransaction {
        id,
        confirmations: vec![test_key(1)],
        signs_required: 2,
        signs_received: 1,
        creator: test_key(1),
        index: 0,
        dest: test_address(50),
        value: BigUint::from(1_000_000_000u64),
        send_flags: 3,
        bounce: false,
    }
}

/// Connection controller with two `mainnet` presets, connected to the first one
pub async fn connected(factory: &Arc<MockFactory>) -> Arc<ConnectionController> {
    let config = ConnectionControllerConfig {
        presets: vec![preset(1, "mainnet"), preset(2, "mainnet")],
        ..Default::default()
    };
    let controller = ConnectionController::new(config, factory.clone(), MockTimeSource::new(0));
    controller
        .try_switching_network(&preset(1, "mainnet"), false)
        .await
        .unwrap();
    controller
}

pub struct MockTimeSource {
    offset_ms: i64,
}

impl MockTimeSource {
    pub fn new(offset_ms: i64) -> Arc<Self> {
        Arc::new(Self { offset_ms })
    }
}

#[async_trait]
impl TimeSource for MockTimeSource {
    async fn fetch_time_ms(&self) -> Result<u64> {
        Ok((now_ms_u64() as i64 + self.offset_ms) as u64)
    }
}

pub struct MockKeyStore {
    entries: Mutex<Vec<KeyStoreEntry>>,
}

impl MockKeyStore {
    pub fn new(entries: Vec<KeyStoreEntry>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries),
        })
    }
}

#[async_trait]
impl KeyStore for MockKeyStore {
    async fn get_entries(&self) -> Result<Vec<KeyStoreEntry>> {
        Ok(self.entries.lock().clone())
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum ProbeBehavior {
    Ok,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct MockFactory {
    failing: Mutex<HashSet<u32>>,
    hanging: Mutex<HashSet<u32>>,
    block_walking: AtomicBool,
    attempts: Mutex<Vec<u32>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_probe(&self, id: u32) {
        self.failing.lock().insert(id);
    }

    pub fn hang_probe(&self, id: u32) {
        self.hanging.lock().insert(id);
    }

    pub fn set_reliable_behavior(&self, behavior: ReliableBehavior) {
        self.block_walking.store(
            behavior == ReliableBehavior::BlockWalking,
            Ordering::Release,
        );
    }

    pub fn connect_attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }

    /// The last transport created for the preset
    pub fn transport(&self, id: u32) -> Arc<MockTransport> {
        let transports = self.transports.lock();
        transports
            .iter()
            .rev()
            .find(|transport| transport.id == id)
            .cloned()
            .unwrap()
    }

    /// The last connection created for the preset
    pub fn connection(&self, id: u32) -> Arc<MockConnection> {
        let connections = self.connections.lock();
        connections
            .iter()
            .rev()
            .find(|connection| connection.id == id)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create_connection(
        &self,
        params: &ConnectionData,
    ) -> Result<Arc<dyn NetworkConnection>> {
        self.attempts.lock().push(params.id);

        let connection = Arc::new(MockConnection {
            id: params.id,
            freed: AtomicBool::new(false),
        });
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }

    async fn create_transport(
        &self,
        params: &ConnectionData,
        _connection: Arc<dyn NetworkConnection>,
    ) -> Result<Arc<dyn Transport>> {
        let probe = if self.hanging.lock().contains(&params.id) {
            ProbeBehavior::Hang
        } else if self.failing.lock().contains(&params.id) {
            ProbeBehavior::Fail
        } else {
            ProbeBehavior::Ok
        };

        let reliable_behavior = if self.block_walking.load(Ordering::Acquire) {
            ReliableBehavior::BlockWalking
        } else {
            ReliableBehavior::IntensivePolling
        };

        let transport = Arc::new(MockTransport {
            id: params.id,
            probe,
            reliable_behavior,
            freed: Default::default(),
            latest_block_calls: Default::default(),
            fail_latest_block: Default::default(),
            block_wait_calls: Default::default(),
            failing_block_waits: Default::default(),
            wallets: Default::default(),
            token_wallets: Default::default(),
            generic_contracts: Default::default(),
        });
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

pub struct MockConnection {
    id: u32,
    freed: AtomicBool,
}

impl MockConnection {
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }
}

impl NetworkConnection for MockConnection {
    fn free(&self) {
        self.freed.store(true, Ordering::Release);
    }
}

pub struct MockTransport {
    id: u32,
    probe: ProbeBehavior,
    reliable_behavior: ReliableBehavior,
    freed: AtomicBool,
    latest_block_calls: AtomicUsize,
    fail_latest_block: AtomicBool,
    block_wait_calls: AtomicUsize,
    failing_block_waits: AtomicUsize,
    wallets: Mutex<Vec<Arc<MockWalletState>>>,
    token_wallets: Mutex<Vec<Arc<MockTokenWalletState>>>,
    generic_contracts: Mutex<Vec<Arc<MockContractState>>>,
}

impl MockTransport {
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    pub fn latest_block_calls(&self) -> usize {
        self.latest_block_calls.load(Ordering::Acquire)
    }

    pub fn fail_latest_block(&self, fail: bool) {
        self.fail_latest_block.store(fail, Ordering::Release);
    }

    pub fn block_wait_calls(&self) -> usize {
        self.block_wait_calls.load(Ordering::Acquire)
    }

    /// Makes the next `count` block waits fail
    pub fn fail_next_block_waits(&self, count: usize) {
        self.failing_block_waits.store(count, Ordering::Release);
    }

    pub fn add_wallet(&self, wallet: &Arc<MockWalletState>) {
        self.wallets.lock().push(wallet.clone());
    }

    pub fn add_token_wallet(&self, wallet: &Arc<MockTokenWalletState>) {
        self.token_wallets.lock().push(wallet.clone());
    }

    pub fn add_generic_contract(&self, contract: &Arc<MockContractState>) {
        self.generic_contracts.lock().push(contract.clone());
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn info(&self) -> TransportInfo {
        TransportInfo {
            max_transactions_per_fetch: 50,
            reliable_behavior: self.reliable_behavior,
        }
    }

    async fn get_contract_state(&self, _address: &Address) -> Result<RawContractState> {
        match self.probe {
            ProbeBehavior::Ok => Ok(RawContractState::NotExists {
                timings: GenTimings::Unknown,
            }),
            ProbeBehavior::Fail => anyhow::bail!("Connection refused"),
            ProbeBehavior::Hang => futures_util::future::pending().await,
        }
    }

    async fn get_latest_block(&self, _address: &Address) -> Result<LatestBlock> {
        self.latest_block_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_latest_block.load(Ordering::Acquire) {
            anyhow::bail!("Failed to get latest block");
        }
        Ok(LatestBlock {
            id: "block-0".to_owned(),
            end_lt: 0,
            gen_utime: 0,
        })
    }

    async fn wait_for_next_block(
        &self,
        current: &str,
        _address: &Address,
        _timeout: Duration,
    ) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(1)).await;

        self.block_wait_calls.fetch_add(1, Ordering::AcqRel);
        let failed = self
            .failing_block_waits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        if failed {
            anyhow::bail!("Next block timeout");
        }

        let seqno: u32 = current
            .strip_prefix("block-")
            .and_then(|seqno| seqno.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("Invalid block id"))?;
        Ok(format!("block-{}", seqno + 1))
    }

    async fn subscribe_to_native_wallet(
        &self,
        _clock: Arc<dyn Clock>,
        public_key: &UInt256,
        contract_type: ContractType,
        _workchain: i8,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Result<Box<dyn WalletHandle>> {
        let wallet = self
            .wallets
            .lock()
            .iter()
            .find(|wallet| {
                wallet.public_key() == *public_key && wallet.contract_type == contract_type
            })
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Wallet not found"))?;

        *wallet.handler.lock() = Some(handler);
        Ok(MockWallet::new(&wallet))
    }

    async fn subscribe_to_native_wallet_by_address(
        &self,
        _clock: Arc<dyn Clock>,
        address: &Address,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Result<Box<dyn WalletHandle>> {
        let wallet = self
            .wallets
            .lock()
            .iter()
            .find(|wallet| wallet.contract.address == *address)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Wallet not found"))?;

        *wallet.handler.lock() = Some(handler);
        Ok(MockWallet::new(&wallet))
    }

    async fn subscribe_to_token_wallet(
        &self,
        _clock: Arc<dyn Clock>,
        owner: &Address,
        root_token_contract: &Address,
        handler: Arc<dyn TokenWalletSubscriptionHandler>,
    ) -> Result<Box<dyn TokenWalletHandle>> {
        let wallet = self
            .token_wallets
            .lock()
            .iter()
            .find(|wallet| {
                wallet.owner == *owner && wallet.symbol.root_token_contract == *root_token_contract
            })
            .cloned()
            .ok_or(TransportError::InvalidRootTokenContract)?;

        *wallet.handler.lock() = Some(handler);
        Ok(Box::new(MockTokenWallet { state: wallet }))
    }

    async fn subscribe_to_generic_contract(
        &self,
        _clock: Arc<dyn Clock>,
        address: &Address,
        _handler: Arc<dyn GenericContractSubscriptionHandler>,
    ) -> Result<Option<Box<dyn GenericContractHandle>>> {
        let contract = self
            .generic_contracts
            .lock()
            .iter()
            .find(|contract| contract.address == *address)
            .cloned();

        Ok(contract.map(|contract| MockContract::new(&contract) as Box<dyn GenericContractHandle>))
    }

    fn free(&self) {
        self.freed.store(true, Ordering::Release);
    }
}

/// Instrumented contract. Counts calls and detects concurrent refreshes
pub struct MockContractState {
    address: Address,
    polling_method: Mutex<PollingMethod>,
    refresh_delay: Mutex<Duration>,
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
    refresh_calls: AtomicUsize,
    handled_blocks: Mutex<Vec<String>>,
    freed: AtomicBool,
    sent_messages: Mutex<Vec<UInt256>>,
    fail_send: AtomicBool,
    last_lt: AtomicU64,
}

impl MockContractState {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            polling_method: Mutex::new(PollingMethod::Manual),
            refresh_delay: Mutex::new(Duration::ZERO),
            in_flight: Default::default(),
            overlaps: Default::default(),
            refresh_calls: Default::default(),
            handled_blocks: Default::default(),
            freed: Default::default(),
            sent_messages: Default::default(),
            fail_send: Default::default(),
            last_lt: Default::default(),
        })
    }

    pub fn set_polling_method(&self, method: PollingMethod) {
        *self.polling_method.lock() = method;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn set_last_lt(&self, lt: u64) {
        self.last_lt.store(lt, Ordering::Release);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::Release);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::Acquire)
    }

    pub fn handled_blocks(&self) -> Vec<String> {
        self.handled_blocks.lock().clone()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    pub fn sent_messages(&self) -> Vec<UInt256> {
        self.sent_messages.lock().clone()
    }

    fn contract_state(&self) -> ContractState {
        ContractState {
            last_lt: self.last_lt.load(Ordering::Acquire),
            is_deployed: true,
            ..Default::default()
        }
    }

    async fn simulate_request(&self) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.overlaps.fetch_add(1, Ordering::AcqRel);
        }

        let delay = *self.refresh_delay.lock();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.store(false, Ordering::Release);
    }

    async fn refresh(&self) -> Result<PollingMethod> {
        self.simulate_request().await;
        self.refresh_calls.fetch_add(1, Ordering::AcqRel);
        Ok(*self.polling_method.lock())
    }

    async fn handle_block(&self, block_id: &str) -> Result<PollingMethod> {
        self.simulate_request().await;
        self.handled_blocks.lock().push(block_id.to_owned());
        Ok(*self.polling_method.lock())
    }

    fn send(&self, message: &SignedMessage) -> Result<PendingTransaction> {
        if self.fail_send.load(Ordering::Acquire) {
            anyhow::bail!("Message rejected");
        }

        self.sent_messages.lock().push(message.hash);
        Ok(PendingTransaction {
            message_hash: message.hash,
            src: None,
            expire_at: message.expire_at,
        })
    }
}

pub struct MockContract {
    state: Arc<MockContractState>,
}

impl MockContract {
    pub fn new(state: &Arc<MockContractState>) -> Box<Self> {
        Box::new(Self {
            state: state.clone(),
        })
    }
}

#[async_trait]
impl ContractHandle for MockContract {
    fn address(&self) -> &Address {
        &self.state.address
    }

    fn polling_method(&self) -> PollingMethod {
        *self.state.polling_method.lock()
    }

    fn contract_state(&self) -> ContractState {
        self.state.contract_state()
    }

    async fn refresh(&mut self, _clock: &dyn Clock) -> Result<PollingMethod> {
        self.state.refresh().await
    }

    async fn handle_block(&mut self, block_id: &str) -> Result<PollingMethod> {
        self.state.handle_block(block_id).await
    }

    async fn preload_transactions(&mut self, _from_lt: u64) -> Result<()> {
        Ok(())
    }

    fn free(self: Box<Self>) {
        self.state.freed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl GenericContractHandle for MockContract {
    async fn send(&mut self, message: &SignedMessage) -> Result<PendingTransaction> {
        self.state.send(message)
    }
}

pub struct MockWalletState {
    pub contract: Arc<MockContractState>,
    contract_type: ContractType,
    public_key: Mutex<UInt256>,
    custodians: Mutex<Vec<UInt256>>,
    custodians_calls: AtomicUsize,
    pending_transactions: Mutex<Vec<MultisigPendingTransaction>>,
    pending_transactions_calls: AtomicUsize,
    handler: Mutex<Option<Arc<dyn TonWalletSubscriptionHandler>>>,
}

impl MockWalletState {
    pub fn new(address: Address, contract_type: ContractType) -> Arc<Self> {
        Arc::new(Self {
            contract: MockContractState::new(address),
            contract_type,
            public_key: Default::default(),
            custodians: Default::default(),
            custodians_calls: Default::default(),
            pending_transactions: Default::default(),
            pending_transactions_calls: Default::default(),
            handler: Default::default(),
        })
    }

    pub fn public_key(&self) -> UInt256 {
        *self.public_key.lock()
    }

    pub fn set_public_key(&self, public_key: UInt256) {
        *self.public_key.lock() = public_key;
    }

    pub fn set_custodians(&self, custodians: Vec<UInt256>) {
        *self.custodians.lock() = custodians;
    }

    pub fn custodians_calls(&self) -> usize {
        self.custodians_calls.load(Ordering::Acquire)
    }

    pub fn set_pending_transactions(&self, transactions: Vec<MultisigPendingTransaction>) {
        *self.pending_transactions.lock() = transactions;
    }

    pub fn pending_transactions_calls(&self) -> usize {
        self.pending_transactions_calls.load(Ordering::Acquire)
    }

    pub fn set_last_lt(&self, lt: u64) {
        self.contract.set_last_lt(lt);
    }

    pub fn refresh_calls(&self) -> usize {
        self.contract.refresh_calls()
    }

    pub fn is_freed(&self) -> bool {
        self.contract.is_freed()
    }

    pub fn sent_messages(&self) -> Vec<UInt256> {
        self.contract.sent_messages()
    }

    /// Handler passed to the transport on subscription
    pub fn handler(&self) -> Arc<dyn TonWalletSubscriptionHandler> {
        self.handler.lock().clone().unwrap()
    }
}

pub struct MockWallet {
    state: Arc<MockWalletState>,
    public_key: UInt256,
}

impl MockWallet {
    pub fn new(state: &Arc<MockWalletState>) -> Box<Self> {
        Box::new(Self {
            state: state.clone(),
            public_key: state.public_key(),
        })
    }
}

#[async_trait]
impl ContractHandle for MockWallet {
    fn address(&self) -> &Address {
        &self.state.contract.address
    }

    fn polling_method(&self) -> PollingMethod {
        *self.state.contract.polling_method.lock()
    }

    fn contract_state(&self) -> ContractState {
        self.state.contract.contract_state()
    }

    async fn refresh(&mut self, _clock: &dyn Clock) -> Result<PollingMethod> {
        self.state.contract.refresh().await
    }

    async fn handle_block(&mut self, block_id: &str) -> Result<PollingMethod> {
        self.state.contract.handle_block(block_id).await
    }

    async fn preload_transactions(&mut self, _from_lt: u64) -> Result<()> {
        Ok(())
    }

    fn free(self: Box<Self>) {
        self.state.contract.freed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl WalletHandle for MockWallet {
    fn public_key(&self) -> &UInt256 {
        &self.public_key
    }

    fn contract_type(&self) -> ContractType {
        self.state.contract_type
    }

    fn details(&self) -> TonWalletDetails {
        TonWalletDetails {
            requires_separate_deploy: self.state.contract_type.is_multisig(),
            min_amount: 1_000_000,
            max_messages: 4,
            supports_payload: true,
            supports_state_init: false,
            supports_multiple_owners: self.state.contract_type.supports_custodians(),
            supports_code_update: false,
            expiration_time: 3600,
            required_confirmations: None,
        }
    }

    async fn get_custodians(&self) -> Result<Vec<UInt256>> {
        self.state.custodians_calls.fetch_add(1, Ordering::AcqRel);
        Ok(self.state.custodians.lock().clone())
    }

    async fn get_multisig_pending_transactions(&self) -> Result<Vec<MultisigPendingTransaction>> {
        self.state
            .pending_transactions_calls
            .fetch_add(1, Ordering::AcqRel);
        Ok(self.state.pending_transactions.lock().clone())
    }

    async fn prepare_transfer(
        &self,
        clock: &dyn Clock,
        params: TransferParams,
    ) -> Result<TransferAction> {
        Ok(TransferAction::Sign(Box::new(MockUnsignedMessage {
            hash: test_hash(params.amount as u8),
            expire_at: params.expiration.timestamp(clock),
        })))
    }

    async fn estimate_fees(&self, _message: &SignedMessage) -> Result<u128> {
        Ok(1000)
    }

    async fn send(&mut self, message: &SignedMessage) -> Result<PendingTransaction> {
        self.state.contract.send(message)
    }
}

struct MockUnsignedMessage {
    hash: UInt256,
    expire_at: u32,
}

impl UnsignedMessage for MockUnsignedMessage {
    fn hash(&self) -> UInt256 {
        self.hash
    }

    fn expire_at(&self) -> u32 {
        self.expire_at
    }

    fn sign(&self, _signature: &[u8; 64]) -> Result<SignedMessage> {
        Ok(SignedMessage {
            hash: self.hash,
            expire_at: self.expire_at,
            boc: String::new(),
        })
    }
}

pub struct MockTokenWalletState {
    pub contract: Arc<MockContractState>,
    owner: Address,
    symbol: Symbol,
    balance: Mutex<BigUint>,
    handler: Mutex<Option<Arc<dyn TokenWalletSubscriptionHandler>>>,
}

impl MockTokenWalletState {
    pub fn new(address: Address, owner: Address, root_token_contract: Address) -> Arc<Self> {
        Arc::new(Self {
            contract: MockContractState::new(address),
            owner,
            symbol: Symbol {
                name: "Test token".to_owned(),
                symbol: "TKN".to_owned(),
                decimals: 9,
                root_token_contract,
            },
            balance: Default::default(),
            handler: Default::default(),
        })
    }

    pub fn set_balance(&self, balance: BigUint) {
        *self.balance.lock() = balance;
    }

    /// Handler passed to the transport on subscription
    pub fn handler(&self) -> Arc<dyn TokenWalletSubscriptionHandler> {
        self.handler.lock().clone().unwrap()
    }
}

pub struct MockTokenWallet {
    state: Arc<MockTokenWalletState>,
}

#[async_trait]
impl ContractHandle for MockTokenWallet {
    fn address(&self) -> &Address {
        &self.state.contract.address
    }

    fn polling_method(&self) -> PollingMethod {
        *self.state.contract.polling_method.lock()
    }

    fn contract_state(&self) -> ContractState {
        self.state.contract.contract_state()
    }

    async fn refresh(&mut self, _clock: &dyn Clock) -> Result<PollingMethod> {
        self.state.contract.refresh().await
    }

    async fn handle_block(&mut self, block_id: &str) -> Result<PollingMethod> {
        self.state.contract.handle_block(block_id).await
    }

    async fn preload_transactions(&mut self, _from_lt: u64) -> Result<()> {
        Ok(())
    }

    fn free(self: Box<Self>) {
        self.state.contract.freed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl TokenWalletHandle for MockTokenWallet {
    fn owner(&self) -> &Address {
        &self.state.owner
    }

    fn symbol(&self) -> &Symbol {
        &self.state.symbol
    }

    fn version(&self) -> TokenWalletVersion {
        TokenWalletVersion::Tip3
    }

    fn balance(&self) -> BigUint {
        self.state.balance.lock().clone()
    }
}

#[derive(Default)]
pub struct RecordingWalletHandler {
    details: Mutex<Vec<TonWalletDetails>>,
    custodians: Mutex<Vec<Vec<UInt256>>>,
    unconfirmed_transactions: Mutex<Vec<Vec<MultisigPendingTransaction>>>,
}

impl RecordingWalletHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn details(&self) -> Vec<TonWalletDetails> {
        self.details.lock().clone()
    }

    pub fn custodians(&self) -> Vec<Vec<UInt256>> {
        self.custodians.lock().clone()
    }

    pub fn unconfirmed_transactions(&self) -> Vec<Vec<MultisigPendingTransaction>> {
        self.unconfirmed_transactions.lock().clone()
    }
}

impl TonWalletSubscriptionHandler for RecordingWalletHandler {
    fn on_message_sent(&self, _: PendingTransaction, _: Option<TonWalletTransaction>) {}

    fn on_message_expired(&self, _: PendingTransaction) {}

    fn on_state_changed(&self, _: ContractState) {}

    fn on_transactions_found(&self, _: Vec<TonWalletTransaction>, _: TransactionsBatchInfo) {}

    fn on_details_changed(&self, details: TonWalletDetails) {
        self.details.lock().push(details);
    }

    fn on_custodians_changed(&self, custodians: Vec<UInt256>) {
        self.custodians.lock().push(custodians);
    }

    fn on_unconfirmed_transactions_changed(
        &self,
        unconfirmed_transactions: Vec<MultisigPendingTransaction>,
    ) {
        self.unconfirmed_transactions
            .lock()
            .push(unconfirmed_transactions);
    }
}

pub struct RecordingTokenHandler;

impl RecordingTokenHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl TokenWalletSubscriptionHandler for RecordingTokenHandler {
    fn on_balance_changed(&self, _: BigUint) {}

    fn on_transactions_found(
        &self,
        _: Vec<TokenWalletTransactionWithData>,
        _: TransactionsBatchInfo,
    ) {
    }
}

pub struct RecordingGenericHandler;

impl RecordingGenericHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl GenericContractSubscriptionHandler for RecordingGenericHandler {
    fn on_message_sent(&self, _: PendingTransaction, _: Option<Transaction>) {}

    fn on_message_expired(&self, _: PendingTransaction) {}

    fn on_state_changed(&self, _: ContractState) {}

    fn on_transactions_found(&self, _: Vec<Transaction>, _: TransactionsBatchInfo) {}
}
