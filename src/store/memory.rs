//! In-memory key-value store.
//!
//! The canonical session tier, and the storage used by the test suites.

use super::{KeyValueStore, Namespace};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(Namespace, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .get(&(namespace, key.to_string()))
            .cloned())
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries
            .lock()
            .insert((namespace, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<()> {
        self.entries.lock().remove(&(namespace, key.to_string()));
        Ok(())
    }

    async fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|(ns, _)| *ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}
