use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ever_utils::*;
use num_bigint::BigUint;

use super::connection_controller::ConnectionController;
use super::contract_subscription::{
    ContractSubscription, NoopHook, PollingPolicy, SubscriptionConfig,
};
use super::models::{
    Symbol, TokenWalletTransactionWithData, TokenWalletVersion, TransactionsBatchInfo,
};
use crate::transport::TokenWalletHandle;

/// Token wallet subscription. Always polled manually
#[derive(Clone)]
pub struct TokenWalletSubscription {
    subscription: ContractSubscription<dyn TokenWalletHandle>,
    owner: Address,
    symbol: Symbol,
    version: TokenWalletVersion,
}

impl TokenWalletSubscription {
    pub async fn subscribe(
        connection_controller: &ConnectionController,
        config: SubscriptionConfig,
        owner: Address,
        root_token_contract: Address,
        handler: Arc<dyn TokenWalletSubscriptionHandler>,
    ) -> Result<Self> {
        let lease = connection_controller.acquire().await?;
        let clock: Arc<dyn Clock> = connection_controller.clock().clone();

        let wallet = lease
            .transport()
            .subscribe_to_token_wallet(clock.clone(), &owner, &root_token_contract, handler)
            .await?;

        let symbol = wallet.symbol().clone();
        let version = wallet.version();

        let subscription = ContractSubscription::<dyn TokenWalletHandle>::new(
            lease,
            clock,
            wallet,
            config,
            PollingPolicy::ManualOnly,
            Arc::new(NoopHook),
        );

        Ok(Self {
            subscription,
            owner,
            symbol,
            version,
        })
    }

    /// Token wallet address
    pub fn address(&self) -> &Address {
        self.subscription.address()
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn root_token_contract(&self) -> &Address {
        &self.symbol.root_token_contract
    }

    pub fn version(&self) -> TokenWalletVersion {
        self.version
    }

    pub async fn balance(&self) -> Result<BigUint> {
        let wallet = self.subscription.use_contract().await?;
        Ok(wallet.balance())
    }

    pub fn subscription(&self) -> &ContractSubscription<dyn TokenWalletHandle> {
        &self.subscription
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

    pub async fn preload_transactions(&self, from_lt: u64) -> Result<()> {
        let mut wallet = self.subscription.use_contract().await?;
        wallet.preload_transactions(from_lt).await
    }
}

pub trait TokenWalletSubscriptionHandler: Send + Sync {
    fn on_balance_changed(&self, balance: BigUint);

    /// Called every time new transactions are detected.
    /// - When new block found
    /// - When manually requesting the latest transactions (can be called several times)
    /// - When preloading transactions
    fn on_transactions_found(
        &self,
        transactions: Vec<TokenWalletTransactionWithData>,
        batch_info: TransactionsBatchInfo,
    );
}
