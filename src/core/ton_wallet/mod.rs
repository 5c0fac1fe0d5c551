use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ever_utils::*;
use parking_lot::Mutex;

pub use self::models::*;
use super::connection_controller::{ConnectionController, ConnectionLease};
use super::contract_subscription::{
    ContractSubscription, PollingPolicy, SubscriptionConfig, SubscriptionHook,
};
use super::models::{
    ContractState, MultisigPendingTransaction, PendingTransaction, PollingMethod, SignedMessage,
    TonWalletTransaction, TransactionsBatchInfo,
};
use crate::transport::{ContractHandle, TransferAction, TransferParams, WalletHandle};

mod models;

pub const DEFAULT_WORKCHAIN: i8 = 0;

/// Native wallet subscription (EVER wallet, multisig, ...)
#[derive(Clone)]
pub struct EverWalletSubscription {
    subscription: ContractSubscription<dyn WalletHandle>,
    hook: Arc<WalletRefreshHook>,
    public_key: UInt256,
    contract_type: ContractType,
    details: TonWalletDetails,
}

impl EverWalletSubscription {
    pub async fn subscribe(
        connection_controller: &ConnectionController,
        config: SubscriptionConfig,
        public_key: UInt256,
        contract_type: ContractType,
        workchain: i8,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Result<Self> {
        let lease = connection_controller.acquire().await?;
        let clock: Arc<dyn Clock> = connection_controller.clock().clone();

        let wallet = lease
            .transport()
            .subscribe_to_native_wallet(
                clock.clone(),
                &public_key,
                contract_type,
                workchain,
                handler.clone(),
            )
            .await?;

        Ok(Self::with_wallet(lease, clock, config, wallet, handler))
    }

    /// Subscribes to the wallet with an unknown public key and contract type
    pub async fn subscribe_by_address(
        connection_controller: &ConnectionController,
        config: SubscriptionConfig,
        address: &Address,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Result<Self> {
        let lease = connection_controller.acquire().await?;
        let clock: Arc<dyn Clock> = connection_controller.clock().clone();

        let wallet = lease
            .transport()
            .subscribe_to_native_wallet_by_address(clock.clone(), address, handler.clone())
            .await?;

        Ok(Self::with_wallet(lease, clock, config, wallet, handler))
    }

    fn with_wallet(
        lease: ConnectionLease,
        clock: Arc<dyn Clock>,
        config: SubscriptionConfig,
        wallet: Box<dyn WalletHandle>,
        handler: Arc<dyn TonWalletSubscriptionHandler>,
    ) -> Self {
        let public_key = *wallet.public_key();
        let contract_type = wallet.contract_type();
        let details = wallet.details();
        handler.on_details_changed(details);

        let hook = Arc::new(WalletRefreshHook::new(handler));
        let subscription = ContractSubscription::<dyn WalletHandle>::new(
            lease,
            clock,
            wallet,
            config,
            PollingPolicy::Adaptive,
            hook.clone(),
        );

        Self {
            subscription,
            hook,
            public_key,
            contract_type,
            details,
        }
    }

    pub fn address(&self) -> &Address {
        self.subscription.address()
    }

    pub fn public_key(&self) -> &UInt256 {
        &self.public_key
    }

    pub fn contract_type(&self) -> ContractType {
        self.contract_type
    }

    pub fn details(&self) -> TonWalletDetails {
        self.details
    }

    /// Cached custodians. Empty until the first successful fetch
    pub fn custodians(&self) -> Vec<UInt256> {
        self.hook.state.lock().custodians.clone()
    }

    /// Last known unconfirmed multisig transactions
    pub fn unconfirmed_transactions(&self) -> Vec<MultisigPendingTransaction> {
        self.hook.state.lock().unconfirmed_transactions.clone()
    }

    pub fn subscription(&self) -> &ContractSubscription<dyn WalletHandle> {
        &self.subscription
    }

    pub fn polling_method(&self) -> PollingMethod {
        self.subscription.polling_method()
    }

    pub fn set_polling_interval(&self, interval: Duration) {
        self.subscription.set_polling_interval(interval)
    }

    pub fn skip_refresh_timer(&self) {
        self.subscription.skip_refresh_timer()
    }

    pub async fn start(&self) -> Result<()> {
        self.subscription.start().await
    }

    pub async fn pause(&self) {
        self.subscription.pause().await
    }

    pub async fn stop(&self) {
        self.subscription.stop().await
    }

    pub async fn prepare_reliable_polling(&self) -> Result<()> {
        self.subscription.prepare_reliable_polling().await
    }

    pub async fn get_contract_state(&self) -> Result<ContractState> {
        let wallet = self.subscription.use_contract().await?;
        Ok(wallet.contract_state())
    }

    pub async fn estimate_fees(&self, message: &SignedMessage) -> Result<u128> {
        let wallet = self.subscription.use_contract().await?;
        wallet.estimate_fees(message).await
    }

    pub async fn prepare_transfer(&self, params: TransferParams) -> Result<TransferAction> {
        let clock = self.subscription.clock().clone();
        let wallet = self.subscription.use_contract().await?;
        wallet.prepare_transfer(&*clock, params).await
    }

    pub async fn send(&self, message: &SignedMessage) -> Result<PendingTransaction> {
        let mut wallet = self.subscription.use_contract().await?;
        wallet.send(message).await
    }

    pub async fn preload_transactions(&self, from_lt: u64) -> Result<()> {
        let mut wallet = self.subscription.use_contract().await?;
        wallet.preload_transactions(from_lt).await
    }
}

/// Keeps custodians and unconfirmed multisig transactions up to date
pub struct WalletRefreshHook {
    handler: Arc<dyn TonWalletSubscriptionHandler>,
    state: Mutex<WalletRefreshState>,
}

#[derive(Default)]
struct WalletRefreshState {
    custodians: Vec<UInt256>,
    last_lt: Option<u64>,
    unconfirmed_transactions: Vec<MultisigPendingTransaction>,
}

impl WalletRefreshHook {
    pub fn new(handler: Arc<dyn TonWalletSubscriptionHandler>) -> Self {
        Self {
            handler,
            state: Default::default(),
        }
    }
}

#[async_trait]
impl SubscriptionHook<dyn WalletHandle> for WalletRefreshHook {
    async fn on_before_refresh(&self, wallet: &mut (dyn WalletHandle + 'static)) -> Result<()> {
        let contract_type = wallet.contract_type();
        if !contract_type.supports_custodians() {
            return Ok(());
        }

        // NOTE: custodians are never refetched once known
        let has_custodians = !self.state.lock().custodians.is_empty();
        if !has_custodians {
            let custodians = wallet.get_custodians().await?;
            if !custodians.is_empty() {
                self.state.lock().custodians = custodians.clone();
                self.handler.on_custodians_changed(custodians);
            }
        }

        if !contract_type.is_multisig() {
            return Ok(());
        }

        let last_lt = wallet.contract_state().last_lt;
        let should_fetch = {
            let state = self.state.lock();
            state.last_lt != Some(last_lt) || !state.unconfirmed_transactions.is_empty()
        };

        if should_fetch {
            let unconfirmed_transactions = wallet.get_multisig_pending_transactions().await?;
            {
                let mut state = self.state.lock();
                state.last_lt = Some(last_lt);
                state.unconfirmed_transactions = unconfirmed_transactions.clone();
            }
            self.handler
                .on_unconfirmed_transactions_changed(unconfirmed_transactions);
        }

        Ok(())
    }
}

pub trait TonWalletSubscriptionHandler: Send + Sync {
    /// Called when found transaction which is relative with one of the pending transactions
    fn on_message_sent(
        &self,
        pending_transaction: PendingTransaction,
        transaction: Option<TonWalletTransaction>,
    );

    /// Called when no transactions produced for the specific message before some expiration time
    fn on_message_expired(&self, pending_transaction: PendingTransaction);

    /// Called every time a new state is detected
    fn on_state_changed(&self, new_state: ContractState);

    /// Called every time new transactions are detected.
    /// - When new block found
    /// - When manually requesting the latest transactions (can be called several times)
    /// - When preloading transactions
    fn on_transactions_found(
        &self,
        transactions: Vec<TonWalletTransaction>,
        batch_info: TransactionsBatchInfo,
    );

    /// Called once when the wallet is subscribed
    fn on_details_changed(&self, _details: TonWalletDetails) {}

    /// Called when custodians are loaded for the first time
    fn on_custodians_changed(&self, _custodians: Vec<UInt256>) {}

    /// Called after each refresh of the multisig pending transactions
    fn on_unconfirmed_transactions_changed(
        &self,
        _unconfirmed_transactions: Vec<MultisigPendingTransaction>,
    ) {
    }
}
