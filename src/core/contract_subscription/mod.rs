use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ever_utils::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, MutexGuard, Notify};
use tokio::task::JoinHandle;

use super::connection_controller::ConnectionLease;
use super::errors::ControllerError;
use super::models::{PollingMethod, ReliableBehavior};
use crate::transport::{ContractHandle, Transport};

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionConfig {
    /// Manual polling interval for inactive accounts
    #[serde(with = "serde_duration_ms")]
    pub background_polling_interval: Duration,
    /// Manual polling interval while the UI is active
    #[serde(with = "serde_duration_ms")]
    pub intensive_polling_interval: Duration,
    /// Polling interval for the reliable method when the transport can't walk blocks
    #[serde(with = "serde_duration_ms")]
    pub reliable_fallback_interval: Duration,
    /// Timeout of one wait for the next block
    #[serde(with = "serde_duration_ms")]
    pub next_block_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            background_polling_interval: Duration::from_secs(120),
            intensive_polling_interval: Duration::from_secs(10),
            reliable_fallback_interval: Duration::from_secs(2),
            next_block_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PollingPolicy {
    /// Follow the polling method reported by the contract handle
    Adaptive,
    /// Always poll with the configured interval
    ManualOnly,
}

/// Called under the contract lock before each refresh
#[async_trait]
pub trait SubscriptionHook<H: ?Sized + Send + 'static>: Send + Sync {
    async fn on_before_refresh(&self, contract: &mut H) -> Result<()>;
}

pub struct NoopHook;

#[async_trait]
impl<H: ?Sized + Send + 'static> SubscriptionHook<H> for NoopHook {
    async fn on_before_refresh(&self, _: &mut H) -> Result<()> {
        Ok(())
    }
}

/// Polling engine for one contract.
///
/// Owns the native contract handle and one connection lease for its whole
/// lifetime. The poll loop and all [`use_contract`](Self::use_contract) callers
/// are serialized by the contract lock, so at most one refresh is in flight.
pub struct ContractSubscription<H: ?Sized + ContractHandle + 'static> {
    shared: Arc<Shared<H>>,
}

impl<H: ?Sized + ContractHandle + 'static> Clone for ContractSubscription<H> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<H: ?Sized + ContractHandle + 'static> ContractSubscription<H> {
    pub fn new(
        lease: ConnectionLease,
        clock: Arc<dyn Clock>,
        contract: Box<H>,
        config: SubscriptionConfig,
        policy: PollingPolicy,
        hook: Arc<dyn SubscriptionHook<H>>,
    ) -> Self {
        let transport = lease.transport().clone();
        let reliable_behavior = transport.info().reliable_behavior;
        let (running, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                address: *contract.address(),
                polling_method: Mutex::new(contract.polling_method()),
                polling_interval_ms: AtomicU64::new(
                    config.background_polling_interval.as_millis() as u64,
                ),
                clock,
                transport,
                reliable_behavior,
                lease: Mutex::new(Some(lease)),
                contract: tokio::sync::Mutex::new(Some(contract)),
                hook,
                policy,
                config,
                cursor: Default::default(),
                running,
                wake: Notify::new(),
                loop_handle: tokio::sync::Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.shared.config
    }

    /// Polling method reported by the last refresh
    pub fn polling_method(&self) -> PollingMethod {
        self.shared.polling_method()
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.shared.polling_interval_ms.load(Ordering::Acquire))
    }

    /// Applied starting from the next timer
    pub fn set_polling_interval(&self, interval: Duration) {
        self.shared
            .polling_interval_ms
            .store(interval.as_millis() as u64, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Starts the poll loop. Waits for the previous loop to finish
    pub async fn start(&self) -> Result<()> {
        let mut loop_handle = self.shared.loop_handle.lock().await;
        if self.is_closed() {
            return Err(ControllerError::internal("Subscription is already stopped").into());
        }

        if loop_handle.is_some() && self.is_running() {
            return Ok(());
        }

        if let Some(handle) = loop_handle.take() {
            if let Err(e) = handle.await {
                log::error!("Poll loop of {} panicked: {:?}", self.shared.address, e);
            }
        }

        self.shared.running.send_replace(true);
        *loop_handle = Some(tokio::spawn(run_loop(self.shared.clone())));

        Ok(())
    }

    /// Stops the poll loop. No refresh is in flight after this method returns
    pub async fn pause(&self) {
        let mut loop_handle = self.shared.loop_handle.lock().await;
        self.shared.stop_loop(&mut loop_handle).await;
    }

    /// Stops the poll loop, frees the contract handle and releases the connection
    pub async fn stop(&self) {
        {
            let mut loop_handle = self.shared.loop_handle.lock().await;
            self.shared.closed.store(true, Ordering::Release);
            self.shared.stop_loop(&mut loop_handle).await;
        }

        let contract = self.shared.contract.lock().await.take();
        if let Some(contract) = contract {
            contract.free();
        }

        self.shared.lease.lock().take();
    }

    /// Interrupts the current polling timer
    pub fn skip_refresh_timer(&self) {
        self.shared.wake.notify_one();
    }

    /// Locks the contract handle. The poll loop waits until the guard is dropped
    pub async fn use_contract(&self) -> Result<ContractGuard<'_, H>> {
        let guard = self.shared.contract.lock().await;
        if guard.is_none() {
            return Err(ControllerError::unavailable("Subscription is already stopped").into());
        }
        Ok(ContractGuard(guard))
    }

    /// Prefetches the latest block so that the next wait starts from a fresh point
    pub async fn prepare_reliable_polling(&self) -> Result<()> {
        if !self.shared.can_walk_blocks() {
            return Ok(());
        }

        match self
            .shared
            .transport
            .get_latest_block(&self.shared.address)
            .await
        {
            Ok(block) => {
                self.shared.cursor.lock().suggested_block_id = Some(block.id);
                Ok(())
            }
            Err(e) => Err(ControllerError::unavailable(format!(
                "Failed to get latest block: {}",
                e
            ))
            .into()),
        }
    }

    #[cfg(test)]
    fn cursor(&self) -> BlockCursor {
        self.shared.cursor.lock().clone()
    }
}

struct Shared<H: ?Sized + ContractHandle + 'static> {
    address: Address,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    reliable_behavior: ReliableBehavior,
    lease: Mutex<Option<ConnectionLease>>,
    contract: tokio::sync::Mutex<Option<Box<H>>>,
    hook: Arc<dyn SubscriptionHook<H>>,
    policy: PollingPolicy,
    config: SubscriptionConfig,
    polling_method: Mutex<PollingMethod>,
    polling_interval_ms: AtomicU64,
    cursor: Mutex<BlockCursor>,
    running: watch::Sender<bool>,
    wake: Notify,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Locked contract handle of a running subscription
pub struct ContractGuard<'a, H: ?Sized>(MutexGuard<'a, Option<Box<H>>>);

impl<H: ?Sized> std::ops::Deref for ContractGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &Self::Target {
        match self.0.as_deref() {
            Some(contract) => contract,
            None => unreachable!("guard is created only for an existing contract"),
        }
    }
}

impl<H: ?Sized> std::ops::DerefMut for ContractGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.0.as_deref_mut() {
            Some(contract) => contract,
            None => unreachable!("guard is created only for an existing contract"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BlockCursor {
    current_block_id: Option<String>,
    suggested_block_id: Option<String>,
}

impl<H: ?Sized + ContractHandle + 'static> Shared<H> {
    fn polling_method(&self) -> PollingMethod {
        *self.polling_method.lock()
    }

    fn can_walk_blocks(&self) -> bool {
        self.policy == PollingPolicy::Adaptive
            && self.reliable_behavior == ReliableBehavior::BlockWalking
    }

    fn timer_interval(&self, method: PollingMethod) -> Duration {
        match (self.policy, method) {
            (PollingPolicy::Adaptive, PollingMethod::Reliable) => {
                self.config.reliable_fallback_interval
            }
            _ => Duration::from_millis(self.polling_interval_ms.load(Ordering::Acquire)),
        }
    }

    async fn stop_loop(&self, loop_handle: &mut Option<JoinHandle<()>>) {
        self.running.send_replace(false);
        if let Some(handle) = loop_handle.take() {
            if let Err(e) = handle.await {
                log::error!("Poll loop of {} panicked: {:?}", self.address, e);
            }
        }
    }

    async fn refresh(&self) -> Result<()> {
        let mut contract = self.contract.lock().await;
        let contract = match contract.as_deref_mut() {
            Some(contract) => contract,
            None => return Ok(()),
        };

        if let Err(e) = self.hook.on_before_refresh(contract).await {
            log::error!("Failed to prepare refresh of {}: {:?}", self.address, e);
        }

        let method = contract.refresh(&*self.clock).await?;
        *self.polling_method.lock() = method;
        Ok(())
    }

    async fn handle_block(&self, block_id: &str) -> Result<()> {
        let mut contract = self.contract.lock().await;
        let contract = match contract.as_deref_mut() {
            Some(contract) => contract,
            None => return Ok(()),
        };

        if let Err(e) = self.hook.on_before_refresh(contract).await {
            log::error!("Failed to prepare refresh of {}: {:?}", self.address, e);
        }

        let method = contract.handle_block(block_id).await?;
        *self.polling_method.lock() = method;
        Ok(())
    }

    fn current_block_id(&self, method_changed: bool) -> Option<String> {
        let mut cursor = self.cursor.lock();
        let suggested = cursor.suggested_block_id.take();
        if method_changed && suggested.is_some() {
            cursor.current_block_id = suggested;
        }
        cursor.current_block_id.clone()
    }
}

impl<H: ?Sized + ContractHandle + 'static> Drop for Shared<H> {
    fn drop(&mut self) {
        if let Some(contract) = self.contract.get_mut().take() {
            contract.free();
        }
    }
}

async fn run_loop<H: ?Sized + ContractHandle + 'static>(shared: Arc<Shared<H>>) {
    let mut running = shared.running.subscribe();
    let mut previous_method = shared.polling_method();

    loop {
        if !*running.borrow() {
            break;
        }

        let method = shared.polling_method();
        let method_changed = method != previous_method;
        previous_method = method;

        if !shared.can_walk_blocks() || method == PollingMethod::Manual {
            shared.cursor.lock().current_block_id = None;

            let interval = shared.timer_interval(method);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shared.wake.notified() => {},
                _ = running.changed() => {},
            }

            if !*running.borrow() {
                break;
            }

            if let Err(e) = shared.refresh().await {
                log::error!("Failed to refresh {}: {:?}", shared.address, e);
            }
        } else {
            let next_block_id = match shared.current_block_id(method_changed) {
                None => {
                    log::warn!("Starting reliable connection with unknown block");
                    tokio::select! {
                        result = shared.transport.get_latest_block(&shared.address) => {
                            result.map(|block| {
                                shared.cursor.lock().current_block_id = Some(block.id.clone());
                                block.id
                            })
                        },
                        _ = running.changed() => continue,
                    }
                }
                Some(current_block_id) => {
                    tokio::select! {
                        result = shared.transport.wait_for_next_block(
                            &current_block_id,
                            &shared.address,
                            shared.config.next_block_timeout,
                        ) => result,
                        _ = running.changed() => continue,
                    }
                }
            };

            let next_block_id = match next_block_id {
                Ok(id) => id,
                Err(e) => {
                    log::error!("Failed to get next block for {}: {:?}", shared.address, e);
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            if !*running.borrow() {
                break;
            }

            let result = shared.handle_block(&next_block_id).await;
            match result {
                Ok(()) => shared.cursor.lock().current_block_id = Some(next_block_id),
                Err(e) => log::error!("Failed to handle block for {}: {:?}", shared.address, e),
            }
        }
    }
}
