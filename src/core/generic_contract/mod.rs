use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ever_utils::*;

use super::connection_controller::ConnectionController;
use super::contract_subscription::{
    ContractSubscription, NoopHook, PollingPolicy, SubscriptionConfig,
};
use super::models::{
    ContractState, PendingTransaction, PollingMethod, SignedMessage, Transaction,
    TransactionsBatchInfo,
};
use crate::transport::{ContractHandle, GenericContractHandle};

/// Subscription to an arbitrary contract
#[derive(Clone)]
pub struct GenericContractSubscription {
    subscription: ContractSubscription<dyn GenericContractHandle>,
}

impl GenericContractSubscription {
    /// Returns `None` if there is no contract at the specified address
    pub async fn subscribe(
        connection_controller: &ConnectionController,
        config: SubscriptionConfig,
        address: &Address,
        handler: Arc<dyn GenericContractSubscriptionHandler>,
    ) -> Result<Option<Self>> {
        let lease = connection_controller.acquire().await?;
        let clock: Arc<dyn Clock> = connection_controller.clock().clone();

        let contract = match lease
            .transport()
            .subscribe_to_generic_contract(clock.clone(), address, handler)
            .await?
        {
            Some(contract) => contract,
            None => return Ok(None),
        };

        Ok(Some(Self {
            subscription: ContractSubscription::<dyn GenericContractHandle>::new(
                lease,
                clock,
                contract,
                config,
                PollingPolicy::Adaptive,
                Arc::new(NoopHook),
            ),
        }))
    }

    pub fn address(&self) -> &Address {
        self.subscription.address()
    }

    pub fn polling_method(&self) -> PollingMethod {
        self.subscription.polling_method()
    }

    pub fn subscription(&self) -> &ContractSubscription<dyn GenericContractHandle> {
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

    pub async fn get_contract_state(&self) -> Result<ContractState> {
        let contract = self.subscription.use_contract().await?;
        Ok(contract.contract_state())
    }

    pub async fn send(&self, message: &SignedMessage) -> Result<PendingTransaction> {
        self.subscription.prepare_reliable_polling().await?;

        let pending_transaction = {
            let mut contract = self.subscription.use_contract().await?;
            contract.send(message).await?
        };

        self.subscription.skip_refresh_timer();
        Ok(pending_transaction)
    }
}

pub trait GenericContractSubscriptionHandler: Send + Sync {
    /// Called when found transaction which is relative with one of the pending transactions
    fn on_message_sent(
        &self,
        pending_transaction: PendingTransaction,
        transaction: Option<Transaction>,
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
        transactions: Vec<Transaction>,
        batch_info: TransactionsBatchInfo,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::*;

    #[tokio::test]
    async fn missing_contract_is_none() {
        let factory = MockFactory::new();
        let controller = connected(&factory).await;

        let subscription = GenericContractSubscription::subscribe(
            &controller,
            SubscriptionConfig::default(),
            &test_address(5),
            RecordingGenericHandler::new(),
        )
        .await
        .unwrap();
        assert!(subscription.is_none());
    }

    #[tokio::test]
    async fn send_wakes_the_loop() {
        let factory = MockFactory::new();
        let controller = connected(&factory).await;

        let contract = MockContractState::new(test_address(5));
        factory.transport(1).add_generic_contract(&contract);

        let subscription = GenericContractSubscription::subscribe(
            &controller,
            SubscriptionConfig::default(),
            &test_address(5),
            RecordingGenericHandler::new(),
        )
        .await
        .unwrap()
        .unwrap();
        subscription.start().await.unwrap();

        let message = test_signed_message(7, 100);
        let pending = subscription.send(&message).await.unwrap();
        assert_eq!(pending.message_hash, message.hash);
        assert_eq!(contract.sent_messages(), vec![message.hash]);

        // The background timer is skipped
        while contract.refresh_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        subscription.stop().await;
        assert!(contract.is_freed());
    }
}
