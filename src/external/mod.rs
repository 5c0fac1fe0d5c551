use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ever_utils::UInt256;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::connection_controller::ConnectionData;
use crate::transport::Transport;

#[async_trait]
pub trait Storage: Sync + Send {
    /// Retrieve data from storage
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Upsert data into storage and wait until operation complete
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Upsert data into storage without waiting operation result
    fn set_unchecked(&self, key: &str, value: &str);

    /// Remove data from storage and wait until operation complete
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove data without waiting operation result
    fn remove_unchecked(&self, key: &str);
}

/// In-memory storage. Used as a session storage and in tests
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_unchecked(key, value);
        Ok(())
    }

    fn set_unchecked(&self, key: &str, value: &str) {
        self.data.lock().insert(key.to_owned(), value.to_owned());
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.remove_unchecked(key);
        Ok(())
    }

    fn remove_unchecked(&self, key: &str) {
        self.data.lock().remove(key);
    }
}

/// Raw network client (GQL, JRPC or protobuf). Owns a native resource
pub trait NetworkConnection: Send + Sync {
    /// Releases the underlying native resource
    fn free(&self);
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self, params: &ConnectionData)
        -> Result<Arc<dyn NetworkConnection>>;

    async fn create_transport(
        &self,
        params: &ConnectionData,
        connection: Arc<dyn NetworkConnection>,
    ) -> Result<Arc<dyn Transport>>;
}

/// Trusted time source used to correct the local clock
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Returns current unix time in milliseconds
    async fn fetch_time_ms(&self) -> Result<u64>;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStoreEntry {
    pub name: String,
    pub master_key: UInt256,
    pub public_key: UInt256,
    pub account_id: u16,
}

/// Key storage. Only the stored public keys are used here, signing is done elsewhere
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_entries(&self) -> Result<Vec<KeyStoreEntry>>;
}
