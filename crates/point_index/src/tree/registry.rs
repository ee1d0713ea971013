//! Registry - the spatial index over the base and cold tiers.
//!
//! # Insertion
//!
//! ```text
//! depth < null_depth_end    descend, nothing stored
//! depth < base_depth_end    place in the base chunk (one mutex)
//! otherwise                 touch the cold chunk through the clipper,
//!                           then place under that chunk's slot lock
//! ```
//!
//! A leaf that overflows turns into a branch and its points are pushed one
//! level down before the new point continues, so the finished tree depends
//! only on the set of points inserted.
//!
//! # Eviction
//!
//! Cold chunks leave memory only through [`ChunkLedger::clip`] (called by
//! clippers) or [`Registry::sweep`]. Both queue the write-back on the clip
//! pool; errors from those tasks surface at the next `flush_clips`.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::base::BaseChunk;
use super::cell::Cell;
use super::chunk::{Node, NodeRules, Placement};
use super::climber::Climber;
use super::clipper::{ChunkLedger, Clipper};
use super::cold::{ChunkStorage, Cold};
use super::hierarchy::Hierarchy;
use crate::bbox::BBox;
use crate::constants::{base_key, CLIPPER_HIGH_WATER};
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::PointRef;
use crate::storage::Endpoint;
use crate::structure::{ChunkKey, ChunkLayout, Structure};
use crate::threading::{lock, Pool};
use crate::usage::Usage;

/// Everything needed to create or reopen a registry.
#[derive(Clone, Debug)]
pub struct RegistryOptions {
  pub out: Arc<dyn Endpoint>,
  /// Root box of the tree: the build bounds.
  pub root: BBox,
  pub structure: Structure,
  /// Attribute bytes per point.
  pub record_size: usize,
  /// Postfix of the base tier key.
  pub base_postfix: String,
  /// Postfix of cold chunk keys.
  pub cold_postfix: String,
  pub clip_threads: usize,
  pub usage: Arc<Usage>,
  /// Usage at which tentative clips evict.
  pub threshold: f32,
  /// Resident cold chunks that count as 100% usage.
  pub chunk_budget: usize,
}

pub struct Registry {
  layout: ChunkLayout,
  root: BBox,
  rules: NodeRules,
  out: Arc<dyn Endpoint>,
  base: Mutex<BaseChunk>,
  base_postfix: Mutex<String>,
  cold: Arc<Cold>,
  clip_pool: Pool<Result<()>>,
  clip_error: Mutex<Option<Error>>,
  usage: Arc<Usage>,
  threshold: f32,
}

impl Registry {
  /// Empty registry.
  pub fn create(options: RegistryOptions) -> Result<Self> {
    let base = BaseChunk::new(options.record_size);
    Self::with_base(options, base)
  }

  /// Reopen a saved registry from its base tier and hierarchy.
  pub fn open(options: RegistryOptions, hierarchy: &Hierarchy) -> Result<Self> {
    let key = base_key(&options.base_postfix);
    let base = BaseChunk::load(options.out.as_ref(), &key, options.record_size)?;
    let registry = Self::with_base(options, base)?;
    registry.cold.restore(&registry.layout, hierarchy);
    tracing::debug!(
      base = %key,
      cold_chunks = registry.cold.stored().len(),
      "reopened registry"
    );
    Ok(registry)
  }

  fn with_base(options: RegistryOptions, base: BaseChunk) -> Result<Self> {
    let layout = ChunkLayout::new(options.structure)?;
    let rules = NodeRules {
      capacity: layout.structure().node_capacity,
      discard_duplicates: layout.structure().discard_duplicates,
    };
    let storage = ChunkStorage::new(
      Arc::clone(&options.out),
      options.cold_postfix,
      options.record_size,
    );
    let cold = Cold::new(
      storage,
      Arc::clone(&options.usage),
      options.chunk_budget,
      options.threshold,
    );
    Ok(Self {
      layout,
      root: options.root,
      rules,
      out: options.out,
      base: Mutex::new(base),
      base_postfix: Mutex::new(options.base_postfix),
      cold: Arc::new(cold),
      clip_pool: Pool::new("clip", options.clip_threads)?,
      clip_error: Mutex::new(None),
      usage: options.usage,
      threshold: options.threshold,
    })
  }

  #[inline]
  pub fn structure(&self) -> &Structure {
    self.layout.structure()
  }

  #[inline]
  pub fn layout(&self) -> &ChunkLayout {
    &self.layout
  }

  #[inline]
  pub fn root(&self) -> &BBox {
    &self.root
  }

  /// Climber positioned at this tree's root.
  pub fn climber(&self) -> Climber {
    Climber::new(self.root, self.structure().dimensions)
  }

  /// Clipper for `worker` whose touches are recorded against this registry.
  pub fn clipper(self: &Arc<Self>, worker: usize) -> Clipper {
    let ledger: Arc<dyn ChunkLedger> = Arc::clone(self) as Arc<dyn ChunkLedger>;
    Clipper::new(ledger, worker)
  }

  // ===========================================================================
  // Insertion
  // ===========================================================================

  /// Insert one point. Returns false if it was dropped as a duplicate.
  pub fn add_point(&self, climber: &mut Climber, clipper: &mut Clipper, point: PointRef<'_>) -> Result<bool> {
    climber.reset(point.point);
    let inserted = self.insert(climber, clipper, point)?;
    if clipper.len() > CLIPPER_HIGH_WATER {
      clipper.clip_stale()?;
    }
    Ok(inserted)
  }

  fn insert(&self, climber: &mut Climber, clipper: &mut Clipper, point: PointRef<'_>) -> Result<bool> {
    let structure = self.layout.structure();
    let depth_end = structure.depth_end();
    loop {
      let depth = climber.depth();
      if depth >= depth_end {
        return Err(Error::DepthExceeded { depth });
      }
      if structure.is_null(depth) {
        climber.descend();
        continue;
      }

      let placement = if structure.is_base(depth) {
        lock(&self.base).place(climber.id(), point, self.rules)
      } else {
        let key = self.layout.chunk_key(climber.id(), depth);
        clipper.touch(&key)?;
        self.cold.place(&key, climber.id(), point, self.rules)?
      };

      match placement {
        Placement::Inserted => return Ok(true),
        Placement::Duplicate => return Ok(false),
        Placement::Descend => climber.descend(),
        Placement::Split(cell) => {
          for moved in cell.iter() {
            let mut child = climber.retarget(moved.point);
            child.descend();
            self.insert(&mut child, clipper, moved)?;
          }
          climber.descend();
        }
      }
    }
  }

  // ===========================================================================
  // Lookup
  // ===========================================================================

  /// Cell of the leaf containing the climber's target, if any.
  ///
  /// Walks from the climber's current node; reset it first to search from
  /// the root. Never creates nodes or chunks.
  pub fn get_cell(&self, climber: &mut Climber, clipper: &mut Clipper) -> Result<Option<Cell>> {
    let structure = self.layout.structure();
    loop {
      let depth = climber.depth();
      if depth >= structure.depth_end() {
        return Ok(None);
      }
      if structure.is_null(depth) {
        climber.descend();
        continue;
      }

      let node = if structure.is_base(depth) {
        lock(&self.base).node(climber.id()).cloned()
      } else {
        let key = self.layout.chunk_key(climber.id(), depth);
        if !self.cold.contains(&key) {
          return Ok(None);
        }
        clipper.touch(&key)?;
        self.cold.node(&key, climber.id())?
      };

      match node {
        None => return Ok(None),
        Some(Node::Leaf(cell)) => return Ok(Some(cell)),
        Some(Node::Branch) => climber.descend(),
      }
    }
  }

  /// Per-node point counts, branches as 0.
  pub fn hierarchy(&self) -> Hierarchy {
    let mut hierarchy = lock(&self.base).counts();
    hierarchy.overlay(&self.cold.hierarchy());
    hierarchy
  }

  pub fn to_json(&self) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(self.hierarchy())?)
  }

  pub fn point_count(&self) -> u64 {
    self.hierarchy().point_count()
  }

  /// Cold chunks present in storage.
  pub fn ids(&self) -> BTreeSet<ChunkKey> {
    self.cold.stored()
  }

  pub fn resident_chunks(&self) -> usize {
    self.cold.resident()
  }

  /// Call `visit` for every leaf, base tier first, then cold chunks in key
  /// order. Cold chunks are read one at a time.
  pub fn visit_leaves(&self, visit: &mut dyn FnMut(&Id, &Cell) -> Result<()>) -> Result<()> {
    let base = lock(&self.base).chunk().clone();
    visit_chunk_leaves(base.nodes(), visit)?;
    for key in self.cold.keys() {
      if let Some(chunk) = self.cold.read(&key)? {
        visit_chunk_leaves(chunk.nodes(), visit)?;
      }
    }
    Ok(())
  }

  // ===========================================================================
  // Eviction
  // ===========================================================================

  fn spawn_evict(&self, key: ChunkKey) {
    let cold = Arc::clone(&self.cold);
    self.clip_pool.spawn(move || cold.evict(&key));
    while let Some(result) = self.clip_pool.try_next() {
      self.record_clip(result);
    }
  }

  fn record_clip(&self, result: Result<Result<()>>) {
    if let Err(e) | Ok(Err(e)) = result {
      tracing::warn!(error = %e, "cold chunk eviction failed");
      lock(&self.clip_error).get_or_insert(e);
    }
  }

  /// Queue eviction of every resident chunk no clipper holds.
  pub fn sweep(&self) {
    let idle = self.cold.idle_keys();
    if idle.is_empty() {
      return;
    }
    tracing::debug!(chunks = idle.len(), usage = self.usage.get(), "sweeping idle chunks");
    for key in idle {
      self.spawn_evict(key);
    }
  }

  /// True if tentative clips currently evict.
  pub fn under_pressure(&self) -> bool {
    self.usage.get() >= self.threshold
  }

  /// Wait for queued evictions. Returns the first failure since the last
  /// call.
  pub fn flush_clips(&self) -> Result<()> {
    for result in self.clip_pool.join() {
      self.record_clip(result);
    }
    match lock(&self.clip_error).take() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  // ===========================================================================
  // Persistence
  // ===========================================================================

  /// Write every dirty cold chunk and the base tier. The base tier stays
  /// resident; idle cold chunks are released.
  #[tracing::instrument(skip_all)]
  pub fn save(&self) -> Result<()> {
    self.flush_clips()?;
    self.cold.flush()?;
    let key = base_key(&lock(&self.base_postfix));
    lock(&self.base).save(self.out.as_ref(), &key)?;
    tracing::debug!(base = %key, cold_chunks = self.cold.stored().len(), "saved registry");
    Ok(())
  }

  pub fn base_postfix(&self) -> String {
    lock(&self.base_postfix).clone()
  }

  /// Where the next `save` writes the base tier.
  pub fn set_base_postfix(&self, postfix: impl Into<String>) {
    *lock(&self.base_postfix) = postfix.into();
  }

  // ===========================================================================
  // Combination
  // ===========================================================================

  fn ensure_compatible(&self, other: &Registry) -> Result<()> {
    if std::ptr::eq(self, other) {
      return Err(Error::Overlap("a registry cannot be combined with itself".into()));
    }
    self.structure().ensure_same(other.structure())?;
    if self.root != other.root {
      return Err(Error::mismatch(
        "bounds",
        format!("{:?} vs {:?}", self.root, other.root),
      ));
    }
    Ok(())
  }

  /// Union with a registry built over a disjoint spatial subset.
  ///
  /// Rejected before any change if both registries hold the same node or
  /// cold chunk.
  #[tracing::instrument(skip_all)]
  pub fn merge(&self, other: &Registry) -> Result<()> {
    self.ensure_compatible(other)?;
    other.flush_clips()?;
    other.cold.flush()?;
    if other.cold.resident() != 0 {
      return Err(Error::Config("merged registry still has chunks in use".into()));
    }
    if let Some(key) = self.cold.first_collision(&other.cold) {
      return Err(Error::Overlap(format!("cold chunk {key} exists in both builds")));
    }
    {
      let theirs = lock(&other.base);
      lock(&self.base).merge(&theirs)?;
    }
    self.cold.merge_from(&other.cold)?;
    tracing::debug!(chunks = other.cold.stored().len(), "merged registry");
    Ok(())
  }

  /// Insert every point `other` holds. Used for manifest splits, whose
  /// registries cover the same space.
  #[tracing::instrument(skip_all)]
  pub fn absorb(self: &Arc<Self>, other: &Registry) -> Result<u64> {
    self.ensure_compatible(other)?;
    let mut climber = self.climber();
    let mut clipper = self.clipper(0);
    let mut inserted = 0;
    other.visit_leaves(&mut |_, cell| {
      for point in cell.iter() {
        if self.add_point(&mut climber, &mut clipper, point)? {
          inserted += 1;
        }
      }
      Ok(())
    })?;
    clipper.release()?;
    tracing::debug!(points = inserted, "absorbed registry");
    Ok(inserted)
  }
}

fn visit_chunk_leaves<'a>(
  nodes: impl Iterator<Item = (&'a Id, &'a Node)>,
  visit: &mut dyn FnMut(&Id, &Cell) -> Result<()>,
) -> Result<()> {
  for (id, node) in nodes {
    if let Node::Leaf(cell) = node {
      visit(id, cell)?;
    }
  }
  Ok(())
}

impl ChunkLedger for Registry {
  fn acquire(&self, key: &ChunkKey, _worker: usize) -> Result<()> {
    self.cold.acquire(key);
    Ok(())
  }

  fn clip(&self, key: &ChunkKey, worker: usize, tentative: bool) -> Result<()> {
    if self.cold.release(key, tentative)? {
      tracing::trace!(chunk = %key, worker, tentative, "clipping");
      self.spawn_evict(key.clone());
    }
    Ok(())
  }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
