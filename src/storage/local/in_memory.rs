use std::collections::HashMap;
use std::sync::Mutex;
use anyhow::{anyhow, Result};
use crate::storage::area::LocalStore;

/// In‑memory local store (no persistence). Used as a default and for private sessions.
#[derive(Default)]
pub struct InMemoryLocalStore {
    map: Mutex<HashMap<String, String>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.map.lock().ok()?.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow!("local store lock poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow!("local store lock poisoned"))?
            .remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.map
            .lock()
            .map_err(|_| anyhow!("local store lock poisoned"))?
            .clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn keys(&self) -> Vec<String> {
        let Ok(map) = self.map.lock() else {
            return vec![];
        };
        let mut v: Vec<String> = map.keys().cloned().collect();
        v.sort_unstable();
        v
    }
}
