use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::ControllerError;
use crate::external::Storage;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StorageScope {
    /// Survives browser restarts
    Durable,
    /// Survives only service worker restarts
    Session,
}

/// Explicit list of the storage keys used by a controller
#[derive(Debug, Clone, Default)]
pub struct StorageSchema {
    keys: HashMap<&'static str, StorageScope>,
}

impl StorageSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durable(mut self, key: &'static str) -> Self {
        self.keys.insert(key, StorageScope::Durable);
        self
    }

    pub fn session(mut self, key: &'static str) -> Self {
        self.keys.insert(key, StorageScope::Session);
        self
    }

    pub fn scope(&self, key: &str) -> Option<StorageScope> {
        self.keys.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = (&'static str, StorageScope)> + '_ {
        self.keys.iter().map(|(key, scope)| (*key, *scope))
    }
}

/// Storage access which routes keys to the durable or session storage
#[derive(Clone)]
pub struct ScopedStorage {
    schema: Arc<StorageSchema>,
    durable: Arc<dyn Storage>,
    session: Arc<dyn Storage>,
}

impl ScopedStorage {
    pub fn new(
        schema: StorageSchema,
        durable: Arc<dyn Storage>,
        session: Arc<dyn Storage>,
    ) -> Self {
        Self {
            schema: Arc::new(schema),
            durable,
            session,
        }
    }

    pub fn schema(&self) -> &StorageSchema {
        &self.schema
    }

    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.storage(key)?.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let storage = self.storage(key)?;
        let data = serde_json::to_string(value)?;
        storage.set(key, &data).await
    }

    /// Writes the value without waiting for the operation result
    pub fn set_unchecked<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let storage = self.storage(key)?;
        storage.set_unchecked(key, &serde_json::to_string(value)?);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.storage(key)?.remove(key).await
    }

    /// Removes all registered keys of the specified scope
    pub async fn clear(&self, scope: StorageScope) -> Result<()> {
        for (key, key_scope) in self.schema.keys() {
            if key_scope == scope {
                self.storage(key)?.remove(key).await?;
            }
        }
        Ok(())
    }

    fn storage(&self, key: &str) -> Result<&Arc<dyn Storage>> {
        match self.schema.scope(key) {
            Some(StorageScope::Durable) => Ok(&self.durable),
            Some(StorageScope::Session) => Ok(&self.session),
            None => Err(ControllerError::internal(format!("Unknown storage key: {key}")).into()),
        }
    }
}
