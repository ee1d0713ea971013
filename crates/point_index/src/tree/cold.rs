//! Cold tier - chunks loaded on first touch and evicted when idle.
//!
//! Each resident chunk has an index entry holding a reference count (one
//! per live clipper that touched it) and a slot guarding the chunk data.
//!
//! Lock order: a slot may be locked before the index or `folded`, never
//! after. Code holding the index lock clones what it needs and unlocks
//! before touching any slot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use super::chunk::{Chunk, Node, NodeRules, Placement};
use super::hierarchy::Hierarchy;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::PointRef;
use crate::storage::Endpoint;
use crate::structure::{ChunkKey, ChunkLayout};
use crate::threading::lock;
use crate::usage::Usage;

/// Where and how cold chunks are persisted.
#[derive(Clone, Debug)]
pub struct ChunkStorage {
  endpoint: Arc<dyn Endpoint>,
  postfix: String,
  record_size: usize,
}

impl ChunkStorage {
  pub fn new(endpoint: Arc<dyn Endpoint>, postfix: impl Into<String>, record_size: usize) -> Self {
    Self {
      endpoint,
      postfix: postfix.into(),
      record_size,
    }
  }

  pub fn name(&self, key: &ChunkKey) -> String {
    key.storage_key(&self.postfix)
  }

  pub fn load(&self, key: &ChunkKey) -> Result<Chunk> {
    let name = self.name(key);
    let bytes = self.endpoint.get_required(&name)?;
    Chunk::decode(&bytes, &name)
  }

  pub fn store(&self, key: &ChunkKey, chunk: &Chunk) -> Result<()> {
    self.endpoint.put(&self.name(key), &chunk.encode())
  }

  fn same_location(&self, other: &ChunkStorage) -> bool {
    Arc::ptr_eq(&self.endpoint, &other.endpoint) && self.postfix == other.postfix
  }
}

#[derive(Debug, Default)]
struct SlotState {
  chunk: Option<Chunk>,
  /// A copy exists in storage.
  persisted: bool,
  /// The resident copy differs from storage.
  dirty: bool,
}

impl SlotState {
  fn chunk_mut(&mut self, storage: &ChunkStorage, key: &ChunkKey) -> Result<&mut Chunk> {
    let chunk = match self.chunk.take() {
      Some(chunk) => chunk,
      None if self.persisted => storage.load(key)?,
      None => Chunk::new(storage.record_size),
    };
    Ok(self.chunk.insert(chunk))
  }
}

#[derive(Debug)]
struct Slot {
  state: Mutex<SlotState>,
}

#[derive(Debug)]
struct Entry {
  slot: Arc<Slot>,
  refs: usize,
}

#[derive(Debug, Default)]
struct ColdIndex {
  entries: HashMap<ChunkKey, Entry>,
  stored: BTreeSet<ChunkKey>,
}

#[derive(Debug)]
pub struct Cold {
  storage: ChunkStorage,
  index: Mutex<ColdIndex>,
  /// Node counts of each chunk as last persisted.
  folded: Mutex<BTreeMap<ChunkKey, Hierarchy>>,
  usage: Arc<Usage>,
  budget: usize,
  threshold: f32,
}

impl Cold {
  pub fn new(storage: ChunkStorage, usage: Arc<Usage>, budget: usize, threshold: f32) -> Self {
    Self {
      storage,
      index: Mutex::new(ColdIndex::default()),
      folded: Mutex::new(BTreeMap::new()),
      usage,
      budget,
      threshold,
    }
  }

  /// Rebuild the stored chunk set from a saved hierarchy.
  pub fn restore(&self, layout: &ChunkLayout, hierarchy: &Hierarchy) {
    let cold_begin = layout.structure().cold_depth_begin();
    let mut folded = lock(&self.folded);
    let mut index = lock(&self.index);
    for (id, count) in hierarchy.iter() {
      let depth = layout.depth_of(id);
      if depth < cold_begin {
        continue;
      }
      let key = layout.chunk_key(id, depth);
      folded.entry(key.clone()).or_default().set(id.clone(), count);
      index.stored.insert(key);
    }
  }

  pub fn storage(&self) -> &ChunkStorage {
    &self.storage
  }

  /// Take a reference on `key`, creating its slot if it is not resident.
  pub fn acquire(&self, key: &ChunkKey) {
    let mut index = lock(&self.index);
    let persisted = index.stored.contains(key);
    let entry = index.entries.entry(key.clone()).or_insert_with(|| Entry {
      slot: Arc::new(Slot {
        state: Mutex::new(SlotState {
          chunk: None,
          persisted,
          dirty: false,
        }),
      }),
      refs: 0,
    });
    entry.refs += 1;
    let resident = index.entries.len();
    self.usage.update(resident, self.budget);
  }

  /// Drop a reference. Returns true if the chunk should now be evicted.
  pub fn release(&self, key: &ChunkKey, tentative: bool) -> Result<bool> {
    let mut index = lock(&self.index);
    let entry = match index.entries.get_mut(key) {
      Some(entry) if entry.refs > 0 => entry,
      _ => return Err(Error::NotFound(format!("cold chunk {key} is not held"))),
    };
    entry.refs -= 1;
    Ok(entry.refs == 0 && (!tentative || self.usage.get() >= self.threshold))
  }

  fn slot(&self, key: &ChunkKey) -> Result<Arc<Slot>> {
    lock(&self.index)
      .entries
      .get(key)
      .map(|entry| Arc::clone(&entry.slot))
      .ok_or_else(|| Error::NotFound(format!("cold chunk {key} is not acquired")))
  }

  /// Offer a point to node `id` of the held chunk `key`.
  pub fn place(&self, key: &ChunkKey, id: &Id, point: PointRef<'_>, rules: NodeRules) -> Result<Placement> {
    let slot = self.slot(key)?;
    let mut state = lock(&slot.state);
    let placement = state.chunk_mut(&self.storage, key)?.place(id, point, rules);
    if matches!(placement, Placement::Inserted | Placement::Split(_)) {
      state.dirty = true;
    }
    Ok(placement)
  }

  /// Read node `id` of the held chunk `key`.
  pub fn node(&self, key: &ChunkKey, id: &Id) -> Result<Option<Node>> {
    let slot = self.slot(key)?;
    let mut state = lock(&slot.state);
    Ok(state.chunk_mut(&self.storage, key)?.node(id).cloned())
  }

  /// True if `key` is resident or in storage.
  pub fn contains(&self, key: &ChunkKey) -> bool {
    let index = lock(&self.index);
    index.entries.contains_key(key) || index.stored.contains(key)
  }

  /// Evict `key` if no clipper holds it.
  pub fn evict(&self, key: &ChunkKey) -> Result<()> {
    let slot = match lock(&self.index).entries.get(key) {
      Some(entry) if entry.refs == 0 => Arc::clone(&entry.slot),
      _ => return Ok(()),
    };
    self.settle(key, &slot)
  }

  /// Persist every dirty chunk and evict the idle ones.
  pub fn flush(&self) -> Result<()> {
    let slots: Vec<(ChunkKey, Arc<Slot>)> = lock(&self.index)
      .entries
      .iter()
      .map(|(key, entry)| (key.clone(), Arc::clone(&entry.slot)))
      .collect();
    for (key, slot) in slots {
      self.settle(&key, &slot)?;
    }
    Ok(())
  }

  /// Write `slot` back if dirty, then drop it if it is still idle.
  fn settle(&self, key: &ChunkKey, slot: &Arc<Slot>) -> Result<()> {
    let mut state = lock(&slot.state);
    if state.dirty {
      if let Some(chunk) = &state.chunk {
        self.storage.store(key, chunk)?;
        lock(&self.folded).insert(key.clone(), chunk.counts());
        lock(&self.index).stored.insert(key.clone());
      }
      state.dirty = false;
      state.persisted = true;
    }

    let mut index = lock(&self.index);
    let idle = matches!(
      index.entries.get(key),
      Some(entry) if entry.refs == 0 && Arc::ptr_eq(&entry.slot, slot)
    );
    if idle {
      index.entries.remove(key);
      state.chunk = None;
      self.usage.update(index.entries.len(), self.budget);
      tracing::debug!(chunk = %key, resident = index.entries.len(), "evicted cold chunk");
    }
    Ok(())
  }

  /// Resident chunks no clipper holds.
  pub fn idle_keys(&self) -> Vec<ChunkKey> {
    lock(&self.index)
      .entries
      .iter()
      .filter(|(_, entry)| entry.refs == 0)
      .map(|(key, _)| key.clone())
      .collect()
  }

  pub fn resident(&self) -> usize {
    lock(&self.index).entries.len()
  }

  /// References held on `key`, 0 if not resident.
  pub fn refs(&self, key: &ChunkKey) -> usize {
    lock(&self.index).entries.get(key).map_or(0, |entry| entry.refs)
  }

  /// Chunks present in storage.
  pub fn stored(&self) -> BTreeSet<ChunkKey> {
    lock(&self.index).stored.clone()
  }

  /// Stored and resident chunks.
  pub fn keys(&self) -> BTreeSet<ChunkKey> {
    let index = lock(&self.index);
    let mut keys = index.stored.clone();
    keys.extend(index.entries.keys().cloned());
    keys
  }

  /// Node counts over every chunk, resident copies taking precedence.
  pub fn hierarchy(&self) -> Hierarchy {
    let mut hierarchy = Hierarchy::new();
    for counts in lock(&self.folded).values() {
      hierarchy.overlay(counts);
    }
    let slots: Vec<Arc<Slot>> = lock(&self.index)
      .entries
      .values()
      .map(|entry| Arc::clone(&entry.slot))
      .collect();
    for slot in slots {
      if let Some(chunk) = &lock(&slot.state).chunk {
        hierarchy.overlay(&chunk.counts());
      }
    }
    hierarchy
  }

  /// Copy of chunk `key`, from memory if resident.
  pub fn read(&self, key: &ChunkKey) -> Result<Option<Chunk>> {
    let (slot, stored) = {
      let index = lock(&self.index);
      (
        index.entries.get(key).map(|entry| Arc::clone(&entry.slot)),
        index.stored.contains(key),
      )
    };
    if let Some(slot) = slot {
      let state = lock(&slot.state);
      if let Some(chunk) = &state.chunk {
        return Ok(Some(chunk.clone()));
      }
      if state.persisted {
        return self.storage.load(key).map(Some);
      }
      return Ok(None);
    }
    if stored {
      return self.storage.load(key).map(Some);
    }
    Ok(None)
  }

  /// A chunk both tiers claim.
  pub fn first_collision(&self, other: &Cold) -> Option<ChunkKey> {
    let ours = self.keys();
    other.keys().into_iter().find(|key| ours.contains(key))
  }

  /// Take over every chunk `other` has in storage. `other` must have no
  /// resident chunks and no collisions with this tier.
  pub fn merge_from(&self, other: &Cold) -> Result<()> {
    let stored = other.stored();
    if !self.storage.same_location(&other.storage) {
      for key in &stored {
        let bytes = other.storage.endpoint.get_required(&other.storage.name(key))?;
        self.storage.endpoint.put(&self.storage.name(key), &bytes)?;
      }
    }
    {
      let theirs = lock(&other.folded).clone();
      lock(&self.folded).extend(theirs);
    }
    lock(&self.index).stored.extend(stored);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryEndpoint;
  use crate::structure::Structure;
  use glam::DVec3;

  const RULES: NodeRules = NodeRules {
    capacity: 4,
    discard_duplicates: true,
  };

  fn cold(budget: usize, threshold: f32) -> (Cold, Arc<MemoryEndpoint>) {
    let endpoint = Arc::new(MemoryEndpoint::new());
    let storage = ChunkStorage::new(endpoint.clone(), "", 0);
    (
      Cold::new(storage, Arc::new(Usage::default()), budget, threshold),
      endpoint,
    )
  }

  fn point(x: f64) -> PointRef<'static> {
    PointRef::new(DVec3::splat(x), 0, &[])
  }

  #[test]
  fn test_evict_persists_and_reloads() {
    let (cold, endpoint) = cold(1, 1.0);
    let key = ChunkKey::new(2, Id::from(9));
    cold.acquire(&key);
    cold.place(&key, &Id::from(10), point(1.0), RULES).unwrap();
    assert_eq!(cold.resident(), 1);

    assert!(cold.release(&key, false).unwrap());
    cold.evict(&key).unwrap();
    assert_eq!(cold.resident(), 0);
    assert_eq!(endpoint.keys(), vec!["9".to_string()]);
    assert!(cold.contains(&key));

    cold.acquire(&key);
    let node = cold.node(&key, &Id::from(10)).unwrap();
    assert!(matches!(node, Some(Node::Leaf(cell)) if cell.len() == 1));
  }

  #[test]
  fn test_held_chunk_is_not_evicted() {
    let (cold, endpoint) = cold(1, 0.0);
    let key = ChunkKey::new(2, Id::from(9));
    cold.acquire(&key);
    cold.acquire(&key);
    cold.place(&key, &Id::from(9), point(1.0), RULES).unwrap();
    assert!(!cold.release(&key, false).unwrap());
    cold.evict(&key).unwrap();
    assert_eq!(cold.resident(), 1);
    assert!(endpoint.is_empty());

    // Flushing writes the chunk but keeps it resident while held
    cold.flush().unwrap();
    assert_eq!(cold.resident(), 1);
    assert_eq!(endpoint.len(), 1);
  }

  #[test]
  fn test_tentative_release_respects_threshold() {
    let (cold, _) = cold(10, 0.5);
    let key = ChunkKey::new(2, Id::from(9));
    cold.acquire(&key);
    // usage 0.1 < 0.5
    assert!(!cold.release(&key, true).unwrap());
    cold.acquire(&key);
    assert!(cold.release(&key, false).unwrap());
  }

  #[test]
  fn test_release_without_acquire_fails() {
    let (cold, _) = cold(1, 1.0);
    let key = ChunkKey::new(2, Id::from(9));
    assert!(matches!(cold.release(&key, true), Err(Error::NotFound(_))));
  }

  #[test]
  fn test_hierarchy_survives_eviction_and_restore() {
    let structure = Structure {
      base_depth_end: 2,
      nodes_per_chunk: 8,
      ..Structure::default()
    };
    let layout = ChunkLayout::new(structure).unwrap();
    let (cold, _) = cold(1, 1.0);
    let key = layout.chunk_key(&Id::from(10), 2);
    cold.acquire(&key);
    cold.place(&key, &Id::from(10), point(1.0), RULES).unwrap();
    cold.place(&key, &Id::from(11), point(2.0), RULES).unwrap();
    cold.release(&key, false).unwrap();
    cold.flush().unwrap();

    let hierarchy = cold.hierarchy();
    assert_eq!(hierarchy.point_count(), 2);

    let (restored, _) = self::cold(1, 1.0);
    restored.restore(&layout, &hierarchy);
    assert_eq!(restored.stored(), BTreeSet::from([key]));
    assert_eq!(restored.hierarchy(), hierarchy);
  }
}
