use dashmap::DashMap;

use super::Storage;
use crate::error::Result;

/// The default backend: a concurrent in-process map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn iter_keys(&self) -> Result<Vec<String>> {
        Ok(self.map.iter().map(|e| e.key().clone()).collect())
    }

    fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}
