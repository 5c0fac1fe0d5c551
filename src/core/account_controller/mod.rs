use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ever_utils::*;
use futures_util::future::join_all;
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

pub use self::handlers::*;
use super::accounts_storage::{AccountsStorage, AssetsList, ExternalAccount};
use super::batch::{merge_transactions, split_transactions_batch};
use super::connection_controller::ConnectionController;
use super::contract_subscription::SubscriptionConfig;
use super::errors::{ControllerError, TRY_AGAIN_MESSAGE};
use super::models::*;
use super::multisig::{update_multisig_aggregates, MultisigTransactionAggregate};
use super::storage_schema::{ScopedStorage, StorageSchema};
use super::token_wallet::TokenWalletSubscription;
use super::ton_wallet::{EverWalletSubscription, TonWalletDetails, DEFAULT_WORKCHAIN};
use crate::external::{KeyStore, Storage};
use crate::transport::{TransferAction, TransferParams, TransportError};

mod handlers;

const STORAGE_LAST_TRANSACTIONS: &str = "lastTransactions";
const STORAGE_LAST_TOKEN_TRANSACTIONS: &str = "lastTokenTransactions";
const STORAGE_PENDING_TRANSACTIONS: &str = "accountPendingTransactions";

type MessageResult = Result<Option<TonWalletTransaction>, ControllerError>;
type MessageRequests = HashMap<UInt256, oneshot::Sender<MessageResult>>;

/// Manages subscriptions of the accounts of the selected master key.
///
/// Lock order: `accounts_mutex` is taken around starting and stopping
/// subscriptions, never inside the poll loops. Other locks are short
/// synchronous sections which never cross an await point.
pub struct AccountController {
    config: SubscriptionConfig,
    connection_controller: Arc<ConnectionController>,
    keystore: Arc<dyn KeyStore>,
    storage: ScopedStorage,
    accounts_storage: AccountsStorage,
    accounts_mutex: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Subscriptions>,
    state: Mutex<AccountControllerState>,
    last_transactions: Mutex<LastTransactions>,
    send_message_requests: Mutex<HashMap<Address, MessageRequests>>,
    intensive_polling: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    events_tx: EventsTx,
}

#[derive(Default)]
struct Subscriptions {
    ever_wallets: HashMap<Address, EverWalletSubscription>,
    /// Owner -> root token contract -> subscription
    token_wallets: HashMap<Address, HashMap<Address, TokenWalletSubscription>>,
}

#[derive(Default)]
struct LastTransactions {
    ever_wallets: HashMap<Address, TransactionId>,
    token_wallets: HashMap<Address, HashMap<Address, TransactionId>>,
}

impl AccountController {
    pub async fn new(
        config: SubscriptionConfig,
        connection_controller: Arc<ConnectionController>,
        keystore: Arc<dyn KeyStore>,
        durable: Arc<dyn Storage>,
        session: Arc<dyn Storage>,
    ) -> Result<Arc<Self>> {
        let schema = AccountsStorage::register(StorageSchema::new())
            .session(STORAGE_LAST_TRANSACTIONS)
            .session(STORAGE_LAST_TOKEN_TRANSACTIONS)
            .session(STORAGE_PENDING_TRANSACTIONS);
        let storage = ScopedStorage::new(schema, durable, session);
        let accounts_storage = AccountsStorage::load(storage.clone()).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let controller = Arc::new(Self {
            config,
            connection_controller,
            keystore,
            storage,
            accounts_storage,
            accounts_mutex: Default::default(),
            subscriptions: Default::default(),
            state: Default::default(),
            last_transactions: Default::default(),
            send_message_requests: Default::default(),
            intensive_polling: AtomicBool::new(false),
            listeners: Default::default(),
            events_tx,
        });
        controller.start_events_processor(events_rx);

        Ok(controller)
    }

    pub fn accounts_storage(&self) -> &AccountsStorage {
        &self.accounts_storage
    }

    pub fn connection_controller(&self) -> &Arc<ConnectionController> {
        &self.connection_controller
    }

    /// Snapshot of the derived state
    pub fn state(&self) -> AccountControllerState {
        self.state.lock().clone()
    }

    pub fn add_transaction_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }

    pub async fn start_subscriptions(&self) -> Result<()> {
        let _guard = self.accounts_mutex.lock().await;
        self.start_subscriptions_locked().await
    }

    pub async fn stop_subscriptions(&self) {
        let _guard = self.accounts_mutex.lock().await;
        self.stop_subscriptions_locked().await
    }

    pub async fn select_master_key(&self, master_key: UInt256) -> Result<()> {
        let _guard = self.accounts_mutex.lock().await;

        let selected = self
            .accounts_storage
            .stored_data()
            .await
            .selected_master_key()
            .copied();
        if selected == Some(master_key) {
            return Ok(());
        }

        self.disable_intensive_polling();
        self.stop_subscriptions_locked().await;
        self.accounts_storage
            .set_selected_master_key(Some(master_key))
            .await?;
        self.start_subscriptions_locked().await
    }

    /// Stops subscriptions and removes all stored data
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.accounts_mutex.lock().await;
        self.stop_subscriptions_locked().await;

        self.accounts_storage.clear().await?;
        for key in [
            STORAGE_LAST_TRANSACTIONS,
            STORAGE_LAST_TOKEN_TRANSACTIONS,
            STORAGE_PENDING_TRANSACTIONS,
        ] {
            self.storage.remove(key).await?;
        }
        Ok(())
    }

    /// Sends the message and returns the handle to wait for its transaction.
    ///
    /// The request is resolved with `None` when the message expires
    pub async fn send_message(
        &self,
        address: &Address,
        message: SignedMessage,
        info: BriefMessageInfo,
    ) -> Result<PendingMessage> {
        let subscription = self.ever_wallet(address)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut requests = self.send_message_requests.lock();
            let requests = requests.entry(*address).or_default();
            if requests.contains_key(&message.hash) {
                let message = "Message is already sent".to_owned();
                return Err(ControllerError::InvalidRequest(message).into());
            }
            requests.insert(message.hash, tx);
        }

        // Stored before sending so that a fast transaction can't outrun it
        self.add_pending_info(
            address,
            StoredBriefMessageInfo {
                info,
                message_hash: message.hash,
                created_at: self.connection_controller.clock().now_sec_u64() as u32,
                expire_at: message.expire_at,
            },
        );

        let result = match subscription.prepare_reliable_polling().await {
            Ok(()) => subscription.send(&message).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                subscription.skip_refresh_timer();
                Ok(PendingMessage {
                    message_hash: message.hash,
                    rx,
                })
            }
            Err(e) => {
                self.take_request(address, &message.hash);
                self.remove_pending_info(address, &message.hash);
                Err(e)
            }
        }
    }

    /// Enables or disables token wallets of the account
    pub async fn update_token_wallets(
        &self,
        address: &Address,
        token_wallets: HashMap<Address, bool>,
    ) -> Result<AssetsList> {
        let _guard = self.accounts_mutex.lock().await;
        let network_group = self.network_group()?;

        for (root_token_contract, enabled) in token_wallets {
            if enabled {
                let exists = self
                    .subscriptions
                    .lock()
                    .token_wallets
                    .get(address)
                    .map(|wallets| wallets.contains_key(&root_token_contract))
                    .unwrap_or_default();

                if !exists {
                    let subscription = self
                        .subscribe_token_wallet(*address, root_token_contract)
                        .await?;
                    subscription.start().await?;
                    self.subscriptions
                        .lock()
                        .token_wallets
                        .entry(*address)
                        .or_default()
                        .insert(root_token_contract, subscription);
                }

                self.accounts_storage
                    .add_token_wallet(address, &network_group, root_token_contract)
                    .await?;
            } else {
                let subscription = self
                    .subscriptions
                    .lock()
                    .token_wallets
                    .get_mut(address)
                    .and_then(|wallets| wallets.remove(&root_token_contract));

                if let Some(subscription) = subscription {
                    subscription.stop().await;
                }

                self.accounts_storage
                    .remove_token_wallet(address, &network_group, &root_token_contract)
                    .await?;
            }
        }

        self.retain_token_caches();

        self.accounts_storage
            .stored_data()
            .await
            .accounts()
            .get(address)
            .cloned()
            .ok_or_else(|| ControllerError::unavailable("Account not found").into())
    }

    pub fn enable_intensive_polling(&self) {
        if self.intensive_polling.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Enabled intensive polling");
        self.apply_polling_interval(self.config.intensive_polling_interval, true);
    }

    pub fn disable_intensive_polling(&self) {
        if !self.intensive_polling.swap(false, Ordering::AcqRel) {
            return;
        }
        log::debug!("Disabled intensive polling");
        self.apply_polling_interval(self.config.background_polling_interval, false);
    }

    pub fn is_intensive_polling(&self) -> bool {
        self.intensive_polling.load(Ordering::Acquire)
    }

    /// Uses the subscription when it exists, otherwise requests the state directly
    pub async fn get_ever_wallet_contract_state(&self, address: &Address) -> Result<ContractState> {
        let subscription = self.subscriptions.lock().ever_wallets.get(address).cloned();
        match subscription {
            Some(subscription) => subscription.get_contract_state().await,
            None => {
                let address = *address;
                self.connection_controller
                    .use_connection(|connection| async move {
                        let state = connection.transport.get_contract_state(&address).await?;
                        Ok::<_, anyhow::Error>(state.brief())
                    })
                    .await
            }
        }
    }

    pub async fn estimate_fees(&self, address: &Address, message: &SignedMessage) -> Result<u128> {
        self.ever_wallet(address)?.estimate_fees(message).await
    }

    pub async fn prepare_transfer(
        &self,
        address: &Address,
        params: TransferParams,
    ) -> Result<TransferAction> {
        self.ever_wallet(address)?.prepare_transfer(params).await
    }

    /// Loads transactions older than `from_lt`. They are reported as an old batch
    pub async fn preload_transactions(&self, address: &Address, from_lt: u64) -> Result<()> {
        self.ever_wallet(address)?
            .preload_transactions(from_lt)
            .await
    }

    pub async fn preload_token_transactions(
        &self,
        owner: &Address,
        root_token_contract: &Address,
        from_lt: u64,
    ) -> Result<()> {
        let subscription = self
            .subscriptions
            .lock()
            .token_wallets
            .get(owner)
            .and_then(|wallets| wallets.get(root_token_contract))
            .cloned()
            .ok_or_else(|| ControllerError::unavailable("Token wallet subscription not found"))?;
        subscription.preload_transactions(from_lt).await
    }

    pub async fn set_accounts_visibility(&self, visibility: HashMap<Address, bool>) -> Result<()> {
        self.accounts_storage.set_accounts_visibility(visibility).await
    }

    /// Links the account to the keys of the selected master key and subscribes to it
    pub async fn add_external_account(&self, account: ExternalAccount) -> Result<()> {
        let _guard = self.accounts_mutex.lock().await;
        self.accounts_storage.add_external_account(account).await?;

        if self.connection_controller.current_connection().is_some() {
            self.start_subscriptions_locked().await?;
        }
        Ok(())
    }

    pub fn get_pending_messages(&self, address: &Address) -> Vec<StoredBriefMessageInfo> {
        let mut messages = self
            .state
            .lock()
            .account_pending_transactions
            .get(address)
            .map(|infos| infos.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        messages.sort_by_key(|info| info.created_at);
        messages
    }

    pub fn ever_wallet_subscriptions(&self) -> Vec<Address> {
        self.subscriptions.lock().ever_wallets.keys().copied().collect()
    }

    pub fn token_wallet_subscriptions(&self, owner: &Address) -> Vec<Address> {
        self.subscriptions
            .lock()
            .token_wallets
            .get(owner)
            .map(|wallets| wallets.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Applies the event emitted by one of the subscriptions
    pub fn handle_event(&self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::EverWallet { address, event } => {
                self.handle_ever_wallet_event(address, event)
            }
            SubscriptionEvent::TokenWallet {
                owner,
                root_token_contract,
                event,
            } => self.handle_token_wallet_event(owner, root_token_contract, event),
        }
    }

    fn start_events_processor(self: &Arc<Self>, mut events_rx: EventsRx) {
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let controller = match controller.upgrade() {
                    Some(controller) => controller,
                    None => break,
                };
                controller.handle_event(event);
            }
        });
    }

    fn handle_ever_wallet_event(&self, address: Address, event: EverWalletEvent) {
        match event {
            EverWalletEvent::MessageSent {
                pending_transaction,
                transaction,
            } => self.resolve_message(&address, &pending_transaction.message_hash, Ok(transaction)),
            EverWalletEvent::MessageExpired(pending_transaction) => {
                self.resolve_message(&address, &pending_transaction.message_hash, Ok(None))
            }
            EverWalletEvent::StateChanged(state) => {
                self.state.lock().ever_wallet_states.insert(address, state);
                self.sweep_expired_messages(&address);
            }
            EverWalletEvent::TransactionsFound {
                transactions,
                batch_info,
            } => self.handle_ever_transactions(address, transactions, batch_info),
            EverWalletEvent::DetailsChanged(details) => {
                self.state.lock().ever_wallet_details.insert(address, details);
            }
            EverWalletEvent::CustodiansChanged(custodians) => {
                self.state
                    .lock()
                    .ever_wallet_custodians
                    .insert(address, custodians);
            }
            EverWalletEvent::UnconfirmedTransactionsChanged(transactions) => {
                self.state
                    .lock()
                    .ever_wallet_unconfirmed_transactions
                    .insert(address, transactions);
            }
        }
    }

    fn handle_ever_transactions(
        &self,
        address: Address,
        transactions: Vec<TonWalletTransaction>,
        batch_info: TransactionsBatchInfo,
    ) {
        let latest = transactions.iter().map(|item| item.transaction.id).max();
        let last_known_lt = self
            .last_transactions
            .lock()
            .ever_wallets
            .get(&address)
            .map(|id| id.lt)
            .unwrap_or_default();

        let mut new_groups = Vec::new();
        for (transactions, batch_info) in
            split_transactions_batch(transactions, batch_info, last_known_lt)
        {
            if batch_info.batch_type == TransactionsBatchType::New {
                for transaction in &transactions {
                    self.resolve_message(
                        &address,
                        &transaction.transaction.in_msg.hash,
                        Ok(Some(transaction.clone())),
                    );
                }
            }

            {
                let mut state = self.state.lock();
                update_multisig_aggregates(
                    state.account_multisig_transactions.entry(address).or_default(),
                    &transactions,
                );
                merge_transactions(
                    state.account_transactions.entry(address).or_default(),
                    transactions.clone(),
                );
            }

            if batch_info.batch_type == TransactionsBatchType::New {
                new_groups.push((transactions, batch_info));
            }
        }

        if let Some(latest) = latest {
            let mut last_transactions = self.last_transactions.lock();
            let entry = last_transactions.ever_wallets.entry(address).or_insert(latest);
            if entry.lt < latest.lt {
                *entry = latest;
            }
            self.persist(STORAGE_LAST_TRANSACTIONS, &last_transactions.ever_wallets);
        }

        if new_groups.is_empty() {
            return;
        }

        let details = self.state.lock().ever_wallet_details.get(&address).copied();
        let listeners = self.listeners.read().clone();
        for (transactions, batch_info) in &new_groups {
            for listener in &listeners {
                listener.on_ever_transactions_found(
                    &address,
                    details.as_ref(),
                    transactions,
                    batch_info,
                );
            }
        }
    }

    fn handle_token_wallet_event(
        &self,
        owner: Address,
        root_token_contract: Address,
        event: TokenWalletEvent,
    ) {
        match event {
            TokenWalletEvent::BalanceChanged(balance) => {
                self.state
                    .lock()
                    .account_token_balances
                    .entry(owner)
                    .or_default()
                    .insert(root_token_contract, balance);
            }
            TokenWalletEvent::TransactionsFound {
                transactions,
                batch_info,
            } => {
                self.handle_token_transactions(owner, root_token_contract, transactions, batch_info)
            }
        }
    }

    fn handle_token_transactions(
        &self,
        owner: Address,
        root_token_contract: Address,
        transactions: Vec<TokenWalletTransactionWithData>,
        batch_info: TransactionsBatchInfo,
    ) {
        let latest = transactions.iter().map(|item| item.transaction.id).max();
        let last_known_lt = self
            .last_transactions
            .lock()
            .token_wallets
            .get(&owner)
            .and_then(|wallets| wallets.get(&root_token_contract))
            .map(|id| id.lt)
            .unwrap_or_default();

        let mut new_groups = Vec::new();
        for (transactions, batch_info) in
            split_transactions_batch(transactions, batch_info, last_known_lt)
        {
            merge_transactions(
                self.state
                    .lock()
                    .account_token_transactions
                    .entry(owner)
                    .or_default()
                    .entry(root_token_contract)
                    .or_default(),
                transactions.clone(),
            );

            if batch_info.batch_type == TransactionsBatchType::New {
                new_groups.push((transactions, batch_info));
            }
        }

        if let Some(latest) = latest {
            let mut last_transactions = self.last_transactions.lock();
            let entry = last_transactions
                .token_wallets
                .entry(owner)
                .or_default()
                .entry(root_token_contract)
                .or_insert(latest);
            if entry.lt < latest.lt {
                *entry = latest;
            }
            self.persist(STORAGE_LAST_TOKEN_TRANSACTIONS, &last_transactions.token_wallets);
        }

        let listeners = self.listeners.read().clone();
        for (transactions, batch_info) in &new_groups {
            for listener in &listeners {
                listener.on_token_transactions_found(
                    &owner,
                    &root_token_contract,
                    transactions,
                    batch_info,
                );
            }
        }
    }

    /// Removes the request before resolving it, so it is resolved only once
    fn resolve_message(&self, address: &Address, message_hash: &UInt256, result: MessageResult) {
        let tx = self.take_request(address, message_hash);
        self.remove_pending_info(address, message_hash);

        if let Some(tx) = tx {
            tx.send(result).ok();
        }
    }

    /// Resolves messages which expired while nothing was tracking them.
    ///
    /// Pending infos resumed from the session storage have no native pending
    /// transaction, so no expiration event is ever emitted for them
    fn sweep_expired_messages(&self, address: &Address) {
        let now = self.connection_controller.clock().now_sec_u64() as u32;
        let expired = match self.state.lock().account_pending_transactions.get(address) {
            Some(infos) => infos
                .values()
                .filter(|info| info.expire_at <= now)
                .map(|info| info.message_hash)
                .collect::<Vec<_>>(),
            None => return,
        };

        for message_hash in expired {
            log::debug!("Message {} of {} expired", message_hash, address);
            self.resolve_message(address, &message_hash, Ok(None));
        }
    }

    fn take_request(
        &self,
        address: &Address,
        message_hash: &UInt256,
    ) -> Option<oneshot::Sender<MessageResult>> {
        let mut requests = self.send_message_requests.lock();
        let entries = requests.get_mut(address)?;
        let tx = entries.remove(message_hash);
        if entries.is_empty() {
            requests.remove(address);
        }
        tx
    }

    fn reject_all_requests(&self) {
        let requests = std::mem::take(&mut *self.send_message_requests.lock());
        for tx in requests.into_values().flat_map(HashMap::into_values) {
            tx.send(Err(ControllerError::unavailable(TRY_AGAIN_MESSAGE)))
                .ok();
        }
    }

    fn add_pending_info(&self, address: &Address, info: StoredBriefMessageInfo) {
        let mut state = self.state.lock();
        state
            .account_pending_transactions
            .entry(*address)
            .or_default()
            .insert(info.message_hash, info);
        self.persist(STORAGE_PENDING_TRANSACTIONS, &state.account_pending_transactions);
    }

    fn remove_pending_info(&self, address: &Address, message_hash: &UInt256) {
        let mut state = self.state.lock();
        let pending = &mut state.account_pending_transactions;

        let removed = match pending.get_mut(address) {
            Some(infos) => {
                let removed = infos.remove(message_hash).is_some();
                if infos.is_empty() {
                    pending.remove(address);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.persist(STORAGE_PENDING_TRANSACTIONS, pending);
        }
    }

    fn persist<T>(&self, key: &str, value: &T)
    where
        T: Serialize + ?Sized,
    {
        if let Err(e) = self.storage.set_unchecked(key, value) {
            log::error!("Failed to save {}: {:?}", key, e);
        }
    }

    async fn start_subscriptions_locked(&self) -> Result<()> {
        let network_group = self.network_group()?;
        self.load_session_state().await;

        let accounts = self.reachable_accounts().await?;
        let interval = self.polling_interval();

        let ever_wallets = {
            let subscriptions = self.subscriptions.lock();
            accounts
                .iter()
                .filter(|account| !subscriptions.ever_wallets.contains_key(account.address()))
                .map(|account| account.ton_wallet.clone())
                .collect::<Vec<_>>()
        };

        let results = join_all(ever_wallets.into_iter().map(|asset| async move {
            let handler = Arc::new(EverWalletHandler::new(asset.address, self.events_tx.clone()));
            let result = EverWalletSubscription::subscribe(
                &self.connection_controller,
                self.config,
                asset.public_key,
                asset.contract,
                DEFAULT_WORKCHAIN,
                handler,
            )
            .await;
            (asset.address, result)
        }))
        .await;

        for (address, result) in results {
            let subscription = match result {
                Ok(subscription) => subscription,
                Err(e) => {
                    log::error!("Failed to subscribe to {}: {:?}", address, e);
                    continue;
                }
            };

            subscription.set_polling_interval(interval);
            if let Err(e) = subscription.start().await {
                log::error!("Failed to start subscription for {}: {:?}", address, e);
            }
            self.subscriptions
                .lock()
                .ever_wallets
                .insert(address, subscription);
        }

        let token_wallets = {
            let subscriptions = self.subscriptions.lock();
            accounts
                .iter()
                .flat_map(|account| {
                    let owner = *account.address();
                    account
                        .token_wallets(&network_group)
                        .iter()
                        .map(move |asset| (owner, asset.root_token_contract))
                })
                .filter(|(owner, root_token_contract)| {
                    !subscriptions
                        .token_wallets
                        .get(owner)
                        .map(|wallets| wallets.contains_key(root_token_contract))
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
        };

        let results = join_all(token_wallets.into_iter().map(
            |(owner, root_token_contract)| async move {
                let result = self.subscribe_token_wallet(owner, root_token_contract).await;
                (owner, root_token_contract, result)
            },
        ))
        .await;

        for (owner, root_token_contract, result) in results {
            match result {
                Ok(subscription) => {
                    subscription.set_polling_interval(interval);
                    if let Err(e) = subscription.start().await {
                        log::error!("Failed to start token subscription for {}: {:?}", owner, e);
                    }
                    self.subscriptions
                        .lock()
                        .token_wallets
                        .entry(owner)
                        .or_default()
                        .insert(root_token_contract, subscription);
                }
                Err(e) if is_invalid_root_token_contract(&e) => {
                    log::warn!(
                        "Removing invalid token wallet {} of {}",
                        root_token_contract,
                        owner
                    );
                    if let Err(e) = self
                        .accounts_storage
                        .remove_token_wallet(&owner, &network_group, &root_token_contract)
                        .await
                    {
                        log::error!("Failed to remove token wallet: {:?}", e);
                    }
                }
                Err(e) => {
                    log::error!("Failed to subscribe to token wallet of {}: {:?}", owner, e)
                }
            }
        }

        Ok(())
    }

    async fn stop_subscriptions_locked(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());

        join_all(subscriptions.ever_wallets.values().map(|item| item.stop())).await;
        join_all(
            subscriptions
                .token_wallets
                .values()
                .flat_map(HashMap::values)
                .map(|item| item.stop()),
        )
        .await;

        self.reject_all_requests();
        *self.state.lock() = Default::default();
        *self.last_transactions.lock() = Default::default();
    }

    /// Reloads the state which survives service worker restarts
    async fn load_session_state(&self) {
        let now = self.connection_controller.clock().now_sec_u64() as u32;

        let ever_wallets = self
            .load_or_default::<HashMap<Address, TransactionId>>(STORAGE_LAST_TRANSACTIONS)
            .await;
        let token_wallets = self
            .load_or_default::<HashMap<Address, HashMap<Address, TransactionId>>>(
                STORAGE_LAST_TOKEN_TRANSACTIONS,
            )
            .await;
        let mut pending = self
            .load_or_default::<HashMap<Address, HashMap<UInt256, StoredBriefMessageInfo>>>(
                STORAGE_PENDING_TRANSACTIONS,
            )
            .await;

        for infos in pending.values_mut() {
            infos.retain(|_, info| info.expire_at > now);
        }
        pending.retain(|_, infos| !infos.is_empty());

        {
            let mut last_transactions = self.last_transactions.lock();
            for (address, id) in ever_wallets {
                last_transactions.ever_wallets.entry(address).or_insert(id);
            }
            for (owner, wallets) in token_wallets {
                let entry = last_transactions.token_wallets.entry(owner).or_default();
                for (root_token_contract, id) in wallets {
                    entry.entry(root_token_contract).or_insert(id);
                }
            }
        }

        let mut state = self.state.lock();
        for (address, infos) in pending {
            state
                .account_pending_transactions
                .entry(address)
                .or_default()
                .extend(infos);
        }
        self.persist(STORAGE_PENDING_TRANSACTIONS, &state.account_pending_transactions);
    }

    async fn load_or_default<T>(&self, key: &str) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.storage.get(key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                log::error!("Failed to load {}: {:?}", key, e);
                T::default()
            }
        }
    }

    /// Accounts of the selected master key, including linked external accounts
    async fn reachable_accounts(&self) -> Result<Vec<AssetsList>> {
        let master_key = match self
            .accounts_storage
            .stored_data()
            .await
            .selected_master_key()
        {
            Some(master_key) => *master_key,
            None => return Ok(Vec::new()),
        };

        let public_keys = self
            .keystore
            .get_entries()
            .await?
            .into_iter()
            .filter(|entry| entry.master_key == master_key)
            .map(|entry| entry.public_key)
            .collect::<HashSet<_>>();

        let data = self.accounts_storage.stored_data().await;
        let external = data
            .external_accounts()
            .iter()
            .filter(|account| account.external_in.iter().any(|key| public_keys.contains(key)))
            .map(|account| account.address)
            .collect::<HashSet<_>>();

        Ok(data
            .accounts()
            .values()
            .filter(|account| {
                public_keys.contains(&account.ton_wallet.public_key)
                    || external.contains(account.address())
            })
            .cloned()
            .collect())
    }

    async fn subscribe_token_wallet(
        &self,
        owner: Address,
        root_token_contract: Address,
    ) -> Result<TokenWalletSubscription> {
        let handler = Arc::new(TokenWalletHandler::new(
            owner,
            root_token_contract,
            self.events_tx.clone(),
        ));
        let subscription = TokenWalletSubscription::subscribe(
            &self.connection_controller,
            self.config,
            owner,
            root_token_contract,
            handler,
        )
        .await?;
        subscription.set_polling_interval(self.polling_interval());
        Ok(subscription)
    }

    /// Drops token transactions of the wallets which are no longer subscribed
    fn retain_token_caches(&self) {
        let subscribed = self
            .subscriptions
            .lock()
            .token_wallets
            .iter()
            .flat_map(|(owner, wallets)| wallets.keys().map(move |root| (*owner, *root)))
            .collect::<HashSet<_>>();

        let mut state = self.state.lock();
        for (owner, wallets) in state.account_token_transactions.iter_mut() {
            wallets.retain(|root, _| subscribed.contains(&(*owner, *root)));
        }
        state
            .account_token_transactions
            .retain(|_, wallets| !wallets.is_empty());
        for (owner, balances) in state.account_token_balances.iter_mut() {
            balances.retain(|root, _| subscribed.contains(&(*owner, *root)));
        }
    }

    fn apply_polling_interval(&self, interval: Duration, skip_timer: bool) {
        let subscriptions = self.subscriptions.lock();
        for subscription in subscriptions.ever_wallets.values() {
            subscription.set_polling_interval(interval);
            if skip_timer {
                subscription.skip_refresh_timer();
            }
        }
        for subscription in subscriptions.token_wallets.values().flat_map(HashMap::values) {
            subscription.set_polling_interval(interval);
            if skip_timer {
                subscription.skip_refresh_timer();
            }
        }
    }

    fn polling_interval(&self) -> Duration {
        if self.is_intensive_polling() {
            self.config.intensive_polling_interval
        } else {
            self.config.background_polling_interval
        }
    }

    fn network_group(&self) -> Result<String> {
        match self.connection_controller.current_connection() {
            Some(connection) => Ok(connection.group),
            None => Err(ControllerError::ConnectionNotInitialized.into()),
        }
    }

    fn ever_wallet(&self, address: &Address) -> Result<EverWalletSubscription> {
        match self.subscriptions.lock().ever_wallets.get(address) {
            Some(subscription) => Ok(subscription.clone()),
            None => Err(ControllerError::unavailable(format!(
                "Subscription for {} not found",
                address
            ))
            .into()),
        }
    }
}

fn is_invalid_root_token_contract(error: &anyhow::Error) -> bool {
    error.chain().any(|e| {
        matches!(
            e.downcast_ref::<TransportError>(),
            Some(TransportError::InvalidRootTokenContract)
        )
    })
}

/// Receives new transactions of all subscribed wallets
pub trait TransactionListener: Send + Sync {
    fn on_ever_transactions_found(
        &self,
        _address: &Address,
        _details: Option<&TonWalletDetails>,
        _transactions: &[TonWalletTransaction],
        _batch_info: &TransactionsBatchInfo,
    ) {
    }

    fn on_token_transactions_found(
        &self,
        _owner: &Address,
        _root_token_contract: &Address,
        _transactions: &[TokenWalletTransactionWithData],
        _batch_info: &TransactionsBatchInfo,
    ) {
    }
}

/// Sent message waiting for its transaction
pub struct PendingMessage {
    message_hash: UInt256,
    rx: oneshot::Receiver<MessageResult>,
}

impl PendingMessage {
    pub fn message_hash(&self) -> &UInt256 {
        &self.message_hash
    }

    /// Returns `None` if the message has expired
    pub async fn wait(self) -> Result<Option<TonWalletTransaction>> {
        match self.rx.await {
            Ok(Ok(transaction)) => Ok(transaction),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ControllerError::unavailable(TRY_AGAIN_MESSAGE).into()),
        }
    }
}

ever_utils::define_string_enum!(
    #[derive(Debug, Copy, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
    pub enum MessageKind {
        Transfer,
        Confirm,
        Deploy,
    }
);

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefMessageInfo {
    pub kind: MessageKind,
    #[serde(with = "serde_u64")]
    pub amount: u64,
    pub recipient: Option<Address>,
}

/// Info about the sent message which survives restarts
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBriefMessageInfo {
    #[serde(flatten)]
    pub info: BriefMessageInfo,
    pub message_hash: UInt256,
    pub created_at: u32,
    pub expire_at: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AccountControllerState {
    pub ever_wallet_states: HashMap<Address, ContractState>,
    pub ever_wallet_details: HashMap<Address, TonWalletDetails>,
    pub ever_wallet_custodians: HashMap<Address, Vec<UInt256>>,
    pub ever_wallet_unconfirmed_transactions: HashMap<Address, Vec<MultisigPendingTransaction>>,
    /// Sorted from the newest to the oldest
    pub account_transactions: HashMap<Address, Vec<TonWalletTransaction>>,
    pub account_multisig_transactions: HashMap<Address, HashMap<u64, MultisigTransactionAggregate>>,
    pub account_token_balances: HashMap<Address, HashMap<Address, BigUint>>,
    pub account_token_transactions:
        HashMap<Address, HashMap<Address, Vec<TokenWalletTransactionWithData>>>,
    pub account_pending_transactions: HashMap<Address, HashMap<UInt256, StoredBriefMessageInfo>>,
}
