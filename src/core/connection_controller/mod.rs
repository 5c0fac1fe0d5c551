use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use ever_utils::*;
use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit};

pub use self::lease::{ConnectionLease, SharedPermit, SharedPermitGuard};
pub use self::models::*;
use crate::core::errors::ControllerError;
use crate::external::{ConnectionFactory, NetworkConnection, TimeSource};
use crate::transport::Transport;

mod lease;
mod models;

/// Transport and raw connection for one network
pub struct InitializedConnection {
    pub data: ConnectionData,
    pub transport: Arc<dyn Transport>,
    pub connection: Arc<dyn NetworkConnection>,
}

impl InitializedConnection {
    fn free(&self) {
        self.transport.free();
        self.connection.free();
    }
}

/// Owns the single active network connection.
///
/// Subscriptions borrow the connection through [`ConnectionLease`]. A network
/// switch takes the same permit exclusively, so it starts only after all
/// leases are dropped and no lease observes a half switched transport.
pub struct ConnectionController {
    config: ConnectionControllerConfig,
    factory: Arc<dyn ConnectionFactory>,
    time_source: Arc<dyn TimeSource>,
    clock: Arc<ClockWithOffset>,
    state: Mutex<ConnectionState>,
    permit: Arc<SharedPermit>,
    cancel_test: Mutex<Option<oneshot::Sender<()>>>,
}

#[derive(Default)]
struct ConnectionState {
    initialized: Option<Arc<InitializedConnection>>,
    selected: Option<ConnectionData>,
    pending: Option<ConnectionData>,
    failed: Option<ConnectionData>,
}

impl ConnectionController {
    pub fn new(
        config: ConnectionControllerConfig,
        factory: Arc<dyn ConnectionFactory>,
        time_source: Arc<dyn TimeSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            factory,
            time_source,
            clock: Arc::new(ClockWithOffset::default()),
            state: Default::default(),
            permit: SharedPermit::new(),
            cancel_test: Default::default(),
        })
    }

    /// Clock corrected by the offset to the trusted time source
    pub fn clock(&self) -> &Arc<ClockWithOffset> {
        &self.clock
    }

    pub fn presets(&self) -> &[ConnectionData] {
        &self.config.presets
    }

    pub fn find_preset(&self, id: u32) -> Option<&ConnectionData> {
        self.config.presets.iter().find(|preset| preset.id == id)
    }

    pub fn status(&self) -> NetworkStatus {
        let state = self.state.lock();
        NetworkStatus {
            selected: state.selected.clone(),
            pending: state.pending.clone(),
            failed: state.failed.clone(),
        }
    }

    /// Params of the currently active connection
    pub fn current_connection(&self) -> Option<ConnectionData> {
        self.state
            .lock()
            .initialized
            .as_ref()
            .map(|connection| connection.data.clone())
    }

    /// Synchronizes the clock and connects to the specified preset (or the first one).
    ///
    /// Connection failures are not returned. The preset is marked as failed instead
    pub async fn initialize(self: &Arc<Self>, preset_id: Option<u32>) -> Result<()> {
        // The first request is often slow, so the offset is computed twice
        for _ in 0..2 {
            if let Err(e) = self.sync_clock_offset().await {
                log::warn!("Failed to sync clock offset: {:?}", e);
            }
        }

        let params = match preset_id {
            Some(id) => self.find_preset(id),
            None => self.config.presets.first(),
        }
        .cloned()
        .ok_or(ConnectionError::UnknownPreset)?;

        if let Err(e) = self.try_switching_network(&params, true).await {
            log::error!("Failed to select initial connection: {:?}", e);
            tokio::time::sleep(self.config.initial_retry_delay).await;

            if let Err(e) = self.try_switching_network(&params, true).await {
                log::error!("Failed to select initial connection: {:?}", e);
                self.state.lock().failed = Some(params);
            }
        }

        Ok(())
    }

    /// Borrows the active connection until the lease is dropped
    pub async fn acquire(&self) -> Result<ConnectionLease> {
        if self.state.lock().initialized.is_none() {
            return Err(ControllerError::ConnectionNotInitialized.into());
        }

        let guard = self.permit.acquire_shared().await?;

        // The connection could have been replaced while waiting
        let connection = self.state.lock().initialized.clone();
        match connection {
            Some(connection) => Ok(ConnectionLease::new(connection, guard)),
            None => Err(ControllerError::ConnectionNotInitialized.into()),
        }
    }

    /// Runs the closure with the active connection
    pub async fn use_connection<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<InitializedConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.acquire().await?;
        let result = f(lease.connection().clone()).await;
        drop(lease);
        result
    }

    /// Waits until all leases are released and locks the connection.
    ///
    /// Cancels the connectivity test of the previous switch, if any
    pub async fn start_switching_network(
        self: &Arc<Self>,
        params: &ConnectionData,
    ) -> Result<SwitchingHandle> {
        self.cancel_test_connection();

        let permit = self.permit.acquire_exclusive().await?;
        self.state.lock().pending = Some(params.clone());

        Ok(SwitchingHandle {
            controller: self.clone(),
            params: params.clone(),
            _permit: permit,
        })
    }

    /// Switches to the specified connection or to one of the connections from the same group.
    ///
    /// Stops without trying the rest of the group when a newer switch cancels the attempt
    pub async fn try_switching_network(
        self: &Arc<Self>,
        first: &ConnectionData,
        allow_others: bool,
    ) -> Result<()> {
        let others = self
            .config
            .presets
            .iter()
            .filter(|preset| allow_others && preset.group == first.group && preset.id != first.id);

        for params in std::iter::once(first).chain(others) {
            let handle = self.start_switching_network(params).await?;
            match handle.switch().await {
                Ok(()) => return Ok(()),
                Err(e) if is_cancelled(&e) => {
                    log::info!("Switch to {} was cancelled", params.name);
                    return Err(e);
                }
                Err(e) => log::warn!("Failed to connect to {}: {:?}", params.name, e),
            }
        }

        Err(ConnectionError::NoSuitableConnection.into())
    }

    /// Recalculates the clock offset using the trusted time source
    pub async fn sync_clock_offset(&self) -> Result<i64> {
        let started_at = now_ms_u64();
        let server_time = self.time_source.fetch_time_ms().await?;
        let finished_at = now_ms_u64();

        let local_time = started_at + finished_at.saturating_sub(started_at) / 2;
        let offset = server_time as i64 - local_time as i64;

        self.clock.update_offset(offset);
        log::debug!("Clock offset: {} ms", offset);

        Ok(offset)
    }

    /// Polls the local clock and recalculates the offset when it jumps.
    ///
    /// The task stops when the controller is dropped
    pub fn spawn_clock_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::downgrade(self);
        let interval = self.config.clock_check_interval;
        let threshold = self.config.clock_jump_threshold;

        tokio::spawn(async move {
            let mut last_check = now_ms_u64();
            loop {
                tokio::time::sleep(interval).await;

                let controller = match Weak::upgrade(&controller) {
                    Some(controller) => controller,
                    None => break,
                };

                let now = now_ms_u64();
                if is_clock_jump(last_check, now, interval, threshold) {
                    log::info!("Local clock jump detected");
                    if let Err(e) = controller.sync_clock_offset().await {
                        log::warn!("Failed to sync clock offset: {:?}", e);
                    }
                }

                last_check = now_ms_u64();
            }
        })
    }

    fn cancel_test_connection(&self) {
        if let Some(tx) = self.cancel_test.lock().take() {
            tx.send(()).ok();
        }
    }

    async fn connect_to(&self, params: &ConnectionData) -> Result<InitializedConnection> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel_test.lock() = Some(cancel_tx);

        let result = self.connect_and_test(params, cancel_rx).await;
        self.cancel_test.lock().take();
        result
    }

    async fn connect_and_test(
        &self,
        params: &ConnectionData,
        cancel_rx: oneshot::Receiver<()>,
    ) -> Result<InitializedConnection> {
        let connection = self.factory.create_connection(params).await?;

        let transport = match self.factory.create_transport(params, connection.clone()).await {
            Ok(transport) => transport,
            Err(e) => {
                connection.free();
                return Err(e);
            }
        };

        let probe_address = params.probe_address();
        let probe = tokio::time::timeout(
            self.config.probe_timeout,
            transport.get_contract_state(&probe_address),
        );

        let result: Result<()> = tokio::select! {
            result = probe => match result {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ConnectionError::Timeout.into()),
            },
            _ = cancel_rx => Err(ConnectionError::Cancelled.into()),
        };

        match result {
            Ok(()) => Ok(InitializedConnection {
                data: params.clone(),
                transport,
                connection,
            }),
            Err(e) => {
                transport.free();
                connection.free();
                Err(e)
            }
        }
    }
}

/// Exclusive access to the connection during the network switch.
///
/// The permit and the pending status are released when the handle is consumed or dropped
pub struct SwitchingHandle {
    controller: Arc<ConnectionController>,
    params: ConnectionData,
    _permit: OwnedSemaphorePermit,
}

impl SwitchingHandle {
    pub fn params(&self) -> &ConnectionData {
        &self.params
    }

    /// Connects to the network and replaces the active connection on success
    pub async fn switch(self) -> Result<()> {
        let result = self.controller.connect_to(&self.params).await;

        let mut state = self.controller.state.lock();
        state.pending = None;

        match result {
            Ok(connection) => {
                let old = state.initialized.replace(Arc::new(connection));
                state.selected = Some(self.params.clone());
                state.failed = None;
                drop(state);

                if let Some(old) = old {
                    old.free();
                }

                log::info!("Switched to {}", self.params.name);
                Ok(())
            }
            Err(e) => {
                // A cancelled attempt says nothing about the connection itself
                if !is_cancelled(&e) {
                    state.failed = Some(self.params.clone());
                }
                Err(e)
            }
        }
    }
}

impl Drop for SwitchingHandle {
    fn drop(&mut self) {
        let mut state = self.controller.state.lock();
        if state.pending.as_ref().map(|pending| pending.id) == Some(self.params.id) {
            state.pending = None;
        }
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ConnectionError>(),
        Some(ConnectionError::Cancelled)
    )
}

fn is_clock_jump(last_check: u64, now: u64, interval: Duration, threshold: Duration) -> bool {
    let expected = last_check + interval.as_millis() as u64;
    let diff = if now > expected {
        now - expected
    } else {
        expected - now
    };
    diff > threshold.as_millis() as u64
}
