use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ever_utils::*;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::account_controller::AccountController;
use super::connection_controller::{
    ConnectionController, ConnectionControllerConfig, ConnectionError,
};
use super::contract_subscription::SubscriptionConfig;
use super::generic_contract::{GenericContractSubscription, GenericContractSubscriptionHandler};
use crate::external::{ConnectionFactory, KeyStore, Storage, TimeSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub connection: ConnectionControllerConfig,
    pub subscriptions: SubscriptionConfig,
}

/// Keeps subscriptions alive across network changes
pub struct WalletEngine {
    config: EngineConfig,
    connection_controller: Arc<ConnectionController>,
    account_controller: Arc<AccountController>,
    contracts: Mutex<HashMap<Address, GenericContractSubscription>>,
    network_mutex: tokio::sync::Mutex<()>,
    clock_watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WalletEngine {
    pub async fn new(
        config: EngineConfig,
        factory: Arc<dyn ConnectionFactory>,
        time_source: Arc<dyn TimeSource>,
        keystore: Arc<dyn KeyStore>,
        durable: Arc<dyn Storage>,
        session: Arc<dyn Storage>,
    ) -> Result<Self> {
        let connection_controller =
            ConnectionController::new(config.connection.clone(), factory, time_source);
        let account_controller = AccountController::new(
            config.subscriptions,
            connection_controller.clone(),
            keystore,
            durable,
            session,
        )
        .await?;

        Ok(Self {
            config,
            connection_controller,
            account_controller,
            contracts: Default::default(),
            network_mutex: Default::default(),
            clock_watcher: Default::default(),
        })
    }

    pub fn connection_controller(&self) -> &Arc<ConnectionController> {
        &self.connection_controller
    }

    pub fn account_controller(&self) -> &Arc<AccountController> {
        &self.account_controller
    }

    /// Connects to the network and subscribes to the accounts of the selected master key
    pub async fn initialize(&self, preset_id: Option<u32>) -> Result<()> {
        let _guard = self.network_mutex.lock().await;

        self.connection_controller.initialize(preset_id).await?;
        {
            let mut clock_watcher = self.clock_watcher.lock();
            if clock_watcher.is_none() {
                *clock_watcher = Some(self.connection_controller.spawn_clock_watcher());
            }
        }

        if self.connection_controller.current_connection().is_some() {
            self.account_controller.start_subscriptions().await?;
        }
        Ok(())
    }

    /// Stops all subscriptions, switches the network and subscribes again.
    ///
    /// Generic contract subscriptions are not restored
    pub async fn change_network(&self, connection_id: u32) -> Result<()> {
        let _guard = self.network_mutex.lock().await;

        let params = self
            .connection_controller
            .find_preset(connection_id)
            .cloned()
            .ok_or(ConnectionError::UnknownPreset)?;

        let current = self.connection_controller.current_connection();
        if matches!(&current, Some(current) if current.id == connection_id) {
            return Ok(());
        }

        log::info!("Changing network to {}", params.name);

        // Subscriptions hold connection leases which block the switch
        self.account_controller.stop_subscriptions().await;
        self.stop_contracts().await;

        let result = self
            .connection_controller
            .try_switching_network(&params, true)
            .await;

        if self.connection_controller.current_connection().is_some() {
            if let Err(e) = self.account_controller.start_subscriptions().await {
                log::error!("Failed to restart subscriptions: {:?}", e);
            }
        }

        result
    }

    pub fn set_intensive_polling(&self, enabled: bool) {
        if enabled {
            self.account_controller.enable_intensive_polling();
        } else {
            self.account_controller.disable_intensive_polling();
        }

        let interval = if enabled {
            self.config.subscriptions.intensive_polling_interval
        } else {
            self.config.subscriptions.background_polling_interval
        };
        for subscription in self.contracts.lock().values() {
            subscription.set_polling_interval(interval);
        }
    }

    /// Starts a subscription to an arbitrary contract.
    ///
    /// Returns `None` if there is no contract at the address. The previous
    /// subscription to the same address is stopped
    pub async fn subscribe_to_contract(
        &self,
        address: &Address,
        handler: Arc<dyn GenericContractSubscriptionHandler>,
    ) -> Result<Option<GenericContractSubscription>> {
        let subscription = match GenericContractSubscription::subscribe(
            &self.connection_controller,
            self.config.subscriptions,
            address,
            handler,
        )
        .await?
        {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        if self.account_controller.is_intensive_polling() {
            subscription.set_polling_interval(self.config.subscriptions.intensive_polling_interval);
        }
        subscription.start().await?;

        let previous = self.contracts.lock().insert(*address, subscription.clone());
        if let Some(previous) = previous {
            previous.stop().await;
        }

        Ok(Some(subscription))
    }

    pub async fn unsubscribe_from_contract(&self, address: &Address) {
        let subscription = self.contracts.lock().remove(address);
        if let Some(subscription) = subscription {
            subscription.stop().await;
        }
    }

    async fn stop_contracts(&self) {
        let contracts = std::mem::take(&mut *self.contracts.lock());
        join_all(contracts.values().map(|item| item.stop())).await;
    }
}

impl Drop for WalletEngine {
    fn drop(&mut self) {
        if let Some(clock_watcher) = self.clock_watcher.lock().take() {
            clock_watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::errors::ControllerError;
    use crate::core::test_utils::*;
    use crate::core::ton_wallet::ContractType;
    use crate::external::{KeyStoreEntry, MemoryStorage};

    async fn make_engine(factory: &Arc<MockFactory>) -> WalletEngine {
        let config = EngineConfig {
            connection: ConnectionControllerConfig {
                presets: vec![preset(1, "mainnet"), preset(2, "mainnet"), preset(3, "testnet")],
                ..Default::default()
            },
            ..Default::default()
        };
        let keystore = MockKeyStore::new(vec![KeyStoreEntry {
            name: "Main".to_owned(),
            master_key: test_key(100),
            public_key: test_key(1),
            account_id: 0,
        }]);

        WalletEngine::new(
            config,
            factory.clone(),
            MockTimeSource::new(0),
            keystore,
            MemoryStorage::new(),
            MemoryStorage::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn config_has_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"subscriptions":{"intensivePollingInterval":5000}}"#).unwrap();
        assert_eq!(
            config.subscriptions.intensive_polling_interval,
            Duration::from_secs(5)
        );
        assert_eq!(
            config.subscriptions.background_polling_interval,
            Duration::from_secs(120)
        );
        assert!(config.connection.presets.is_empty());
    }

    #[tokio::test]
    async fn change_network_restarts_subscriptions() {
        let factory = MockFactory::new();
        let engine = make_engine(&factory).await;
        engine.initialize(Some(1)).await.unwrap();

        let old_transport = factory.transport(1);
        let wallet = MockWalletState::new(test_address(1), ContractType::EverWallet);
        wallet.set_public_key(test_key(1));
        old_transport.add_wallet(&wallet);

        let accounts = engine.account_controller();
        accounts
            .accounts_storage()
            .add_account("Main", test_address(1), test_key(1), ContractType::EverWallet)
            .await
            .unwrap();
        accounts.select_master_key(test_key(100)).await.unwrap();
        assert_eq!(accounts.ever_wallet_subscriptions(), [test_address(1)]);

        let contract = MockContractState::new(test_address(2));
        old_transport.add_generic_contract(&contract);
        let subscription = engine
            .subscribe_to_contract(&test_address(2), RecordingGenericHandler::new())
            .await
            .unwrap()
            .unwrap();
        assert!(subscription.subscription().is_running());

        engine.change_network(3).await.unwrap();

        assert_eq!(
            engine.connection_controller().current_connection().unwrap().id,
            3
        );
        assert!(wallet.is_freed());
        assert!(contract.is_freed());
        assert!(subscription.subscription().is_closed());
        assert!(old_transport.is_freed());

        // The new transport doesn't know the wallet, so it is skipped
        assert!(accounts.ever_wallet_subscriptions().is_empty());

        // Same network is a noop
        let attempts = factory.connect_attempts().len();
        engine.change_network(3).await.unwrap();
        assert_eq!(factory.connect_attempts().len(), attempts);
    }

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let factory = MockFactory::new();
        let engine = make_engine(&factory).await;
        engine.initialize(None).await.unwrap();

        let err = engine.change_network(42).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectionError>(),
            Some(ConnectionError::UnknownPreset)
        ));
        assert_eq!(
            engine.connection_controller().current_connection().unwrap().id,
            1
        );
    }

    #[tokio::test]
    async fn failed_switch_falls_back_to_group() {
        let factory = MockFactory::new();
        factory.fail_probe(2);
        let engine = make_engine(&factory).await;
        engine.initialize(Some(3)).await.unwrap();

        engine.change_network(2).await.unwrap();
        assert_eq!(
            engine.connection_controller().current_connection().unwrap().id,
            1
        );
    }

    #[tokio::test]
    async fn missing_contract_is_not_tracked() {
        let factory = MockFactory::new();
        let engine = make_engine(&factory).await;

        let err = engine
            .subscribe_to_contract(&test_address(2), RecordingGenericHandler::new())
            .await
            .err()
            .unwrap();
        assert_eq!(
            ControllerError::find(&err),
            Some(&ControllerError::ConnectionNotInitialized)
        );

        engine.initialize(None).await.unwrap();
        let subscription = engine
            .subscribe_to_contract(&test_address(2), RecordingGenericHandler::new())
            .await
            .unwrap();
        assert!(subscription.is_none());
        assert!(engine.contracts.lock().is_empty());
    }

    #[tokio::test]
    async fn intensive_polling_applies_to_contracts() {
        let factory = MockFactory::new();
        let engine = make_engine(&factory).await;
        engine.initialize(None).await.unwrap();

        let contract = MockContractState::new(test_address(2));
        factory.transport(1).add_generic_contract(&contract);
        let subscription = engine
            .subscribe_to_contract(&test_address(2), RecordingGenericHandler::new())
            .await
            .unwrap()
            .unwrap();

        engine.set_intensive_polling(true);
        assert!(engine.account_controller().is_intensive_polling());
        assert_eq!(
            subscription.subscription().polling_interval(),
            Duration::from_secs(10)
        );

        engine.set_intensive_polling(false);
        assert_eq!(
            subscription.subscription().polling_interval(),
            Duration::from_secs(120)
        );

        engine.unsubscribe_from_contract(&test_address(2)).await;
        assert!(contract.is_freed());
    }
}
