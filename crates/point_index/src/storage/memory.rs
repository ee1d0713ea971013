use std::collections::BTreeMap;
use std::sync::Mutex;

use super::Endpoint;
use crate::error::Result;
use crate::threading::lock;

/// In-process endpoint. Used for tests and as a stand-in remote store.
#[derive(Debug, Default)]
pub struct MemoryEndpoint {
  entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryEndpoint {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stored keys, sorted.
  pub fn keys(&self) -> Vec<String> {
    lock(&self.entries).keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    lock(&self.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    lock(&self.entries).is_empty()
  }
}

impl Endpoint for MemoryEndpoint {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(lock(&self.entries).get(key).cloned())
  }

  fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
    lock(&self.entries).insert(key.to_string(), bytes.to_vec());
    Ok(())
  }

  fn exists(&self, key: &str) -> Result<bool> {
    Ok(lock(&self.entries).contains_key(key))
  }
}
