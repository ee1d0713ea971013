//! Clipper - per-task ledger of touched cold chunks.
//!
//! The first touch of a chunk takes a reference on it. Releasing the
//! clipper (or dropping it) gives every reference back through
//! [`ChunkLedger::clip`], which is the only way a cold chunk becomes
//! eligible for eviction.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::CLIPPER_KEEP;
use crate::error::Result;
use crate::structure::ChunkKey;

/// The capability a clipper needs from the index.
pub trait ChunkLedger: Send + Sync {
  /// Take a reference on `key` for `worker`.
  fn acquire(&self, key: &ChunkKey, worker: usize) -> Result<()>;

  /// Give back a reference taken with `acquire`. A `tentative` release
  /// only evicts under memory pressure.
  fn clip(&self, key: &ChunkKey, worker: usize, tentative: bool) -> Result<()>;
}

pub struct Clipper {
  worker: usize,
  ledger: Arc<dyn ChunkLedger>,
  touched: BTreeMap<ChunkKey, u64>,
  clock: u64,
}

impl Clipper {
  pub fn new(ledger: Arc<dyn ChunkLedger>, worker: usize) -> Self {
    Self {
      worker,
      ledger,
      touched: BTreeMap::new(),
      clock: 0,
    }
  }

  /// Record a touch of `key`, acquiring it on first sight.
  pub fn touch(&mut self, key: &ChunkKey) -> Result<()> {
    self.clock += 1;
    if let Some(marker) = self.touched.get_mut(key) {
      *marker = self.clock;
      return Ok(());
    }
    self.ledger.acquire(key, self.worker)?;
    self.touched.insert(key.clone(), self.clock);
    Ok(())
  }

  pub fn contains(&self, key: &ChunkKey) -> bool {
    self.touched.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.touched.len()
  }

  pub fn is_empty(&self) -> bool {
    self.touched.is_empty()
  }

  pub fn worker(&self) -> usize {
    self.worker
  }

  /// Tentatively release all but the `CLIPPER_KEEP` most recent touches.
  pub fn clip_stale(&mut self) -> Result<()> {
    if self.touched.len() <= CLIPPER_KEEP {
      return Ok(());
    }
    let mut by_age: Vec<(u64, ChunkKey)> = self
      .touched
      .iter()
      .map(|(key, marker)| (*marker, key.clone()))
      .collect();
    by_age.sort_unstable();
    let stale = by_age.len() - CLIPPER_KEEP;

    let mut first_err = None;
    for (_, key) in by_age.into_iter().take(stale) {
      self.touched.remove(&key);
      if let Err(e) = self.ledger.clip(&key, self.worker, true) {
        first_err.get_or_insert(e);
      }
    }
    first_err.map_or(Ok(()), Err)
  }

  /// Release every touched chunk tentatively.
  pub fn release(mut self) -> Result<()> {
    self.release_all()
  }

  fn release_all(&mut self) -> Result<()> {
    let mut first_err = None;
    for key in std::mem::take(&mut self.touched).into_keys() {
      if let Err(e) = self.ledger.clip(&key, self.worker, true) {
        first_err.get_or_insert(e);
      }
    }
    first_err.map_or(Ok(()), Err)
  }
}

impl Drop for Clipper {
  fn drop(&mut self) {
    if self.touched.is_empty() {
      return;
    }
    if let Err(e) = self.release_all() {
      tracing::warn!(worker = self.worker, error = %e, "clipper release failed");
    }
  }
}
