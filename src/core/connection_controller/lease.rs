use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::InitializedConnection;
use crate::core::errors::ControllerError;
use crate::transport::Transport;

/// Binary permit which can be shared by many concurrent holders.
///
/// The first shared acquire takes the permit, nested ones only increment
/// the counter. The permit is returned when the last holder is dropped.
/// Exclusive acquire waits until there are no shared holders.
pub struct SharedPermit {
    semaphore: Arc<Semaphore>,
    state: Mutex<SharedPermitState>,
    // Serializes the slow path of the first shared acquire
    gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct SharedPermitState {
    counter: usize,
    permit: Option<OwnedSemaphorePermit>,
}

impl SharedPermit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(1)),
            state: Default::default(),
            gate: Default::default(),
        })
    }

    /// Number of currently alive shared guards
    pub fn holders(&self) -> usize {
        self.state.lock().counter
    }

    pub async fn acquire_shared(self: &Arc<Self>) -> Result<SharedPermitGuard> {
        if self.try_increment() {
            return Ok(self.make_guard());
        }

        let _gate = self.gate.lock().await;
        if self.try_increment() {
            return Ok(self.make_guard());
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ControllerError::internal("Connection permit closed"))?;

        let mut state = self.state.lock();
        state.counter = 1;
        state.permit = Some(permit);
        drop(state);

        Ok(self.make_guard())
    }

    pub async fn acquire_exclusive(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ControllerError::internal("Connection permit closed").into())
    }

    fn try_increment(&self) -> bool {
        let mut state = self.state.lock();
        if state.counter > 0 {
            state.counter += 1;
            true
        } else {
            false
        }
    }

    fn make_guard(self: &Arc<Self>) -> SharedPermitGuard {
        SharedPermitGuard {
            permit: self.clone(),
        }
    }

    fn release(&self) {
        let permit = {
            let mut state = self.state.lock();
            state.counter = state.counter.saturating_sub(1);
            if state.counter == 0 {
                state.permit.take()
            } else {
                None
            }
        };
        drop(permit);
    }
}

pub struct SharedPermitGuard {
    permit: Arc<SharedPermit>,
}

impl Drop for SharedPermitGuard {
    fn drop(&mut self) {
        self.permit.release();
    }
}

/// Scoped borrow of the active connection. Network switch waits until
/// all leases are dropped
pub struct ConnectionLease {
    connection: Arc<InitializedConnection>,
    _guard: SharedPermitGuard,
}

impl ConnectionLease {
    pub(super) fn new(connection: Arc<InitializedConnection>, guard: SharedPermitGuard) -> Self {
        Self {
            connection,
            _guard: guard,
        }
    }

    pub fn connection(&self) -> &Arc<InitializedConnection> {
        &self.connection
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.connection.transport
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("connection", &self.connection.data.name)
            .finish()
    }
}
