//! Structure - immutable tree geometry of a build.
//!
//! Depth ranges, from the root down:
//!
//! ```text
//! [0, null_depth_end)               implicit branches, never hold points
//! [null_depth_end, base_depth_end)  base tier, always resident
//! [base_depth_end, depth_end)       cold tier, chunked and evictable
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_DEPTH;
use crate::error::{Error, Result};
use crate::id::{level_begin, Id};

/// How many nodes a cold chunk spans at each depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkPolicy {
  /// Every cold chunk spans `nodes_per_chunk` nodes.
  #[default]
  Static,

  /// Chunks past `sparse_depth_begin` span `factor` times more nodes per
  /// level, keeping chunk files large where the tree thins out.
  Dynamic {
    /// First depth whose chunks grow.
    sparse_depth_begin: usize,
  },
}

/// Tree geometry configuration. Fixed for the lifetime of a build and
/// required to match across continuation, unsplit and merge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Structure {
  /// 2 (quadtree) or 3 (octree).
  pub dimensions: u32,

  /// Depths below this never hold points.
  pub null_depth_end: usize,

  /// End of the resident tier and start of the cold tier.
  pub base_depth_end: usize,

  /// End of the cold tier. 0 = bounded only by `MAX_DEPTH`.
  pub cold_depth_end: usize,

  /// Nodes per cold chunk. Must be a power of the branching factor.
  pub nodes_per_chunk: u64,

  pub chunk_policy: ChunkPolicy,

  /// Points a node holds before it splits into a branch.
  pub node_capacity: usize,

  /// Drop points whose coordinates already exist in the target node.
  pub discard_duplicates: bool,
}

impl Default for Structure {
  fn default() -> Self {
    Self {
      dimensions: 3,
      null_depth_end: 0,
      base_depth_end: 6,
      cold_depth_end: 0,
      nodes_per_chunk: 512,
      chunk_policy: ChunkPolicy::Static,
      node_capacity: 64,
      discard_duplicates: true,
    }
  }
}

impl Structure {
  #[inline]
  pub fn is_3d(&self) -> bool {
    self.dimensions == 3
  }

  /// Branching factor: 4 in 2D, 8 in 3D.
  #[inline]
  pub fn factor(&self) -> u64 {
    1u64 << self.dimensions
  }

  /// Exponent `k` with `factor^k == nodes_per_chunk`, if there is one.
  pub fn chunk_exponent(&self) -> Option<usize> {
    let n = self.nodes_per_chunk;
    if n == 0 || !n.is_power_of_two() || self.dimensions == 0 {
      return None;
    }
    let bits = n.trailing_zeros();
    (bits % self.dimensions == 0).then_some((bits / self.dimensions) as usize)
  }

  /// First depth that can never be reached.
  pub fn depth_end(&self) -> usize {
    match self.cold_depth_end {
      0 => MAX_DEPTH,
      end => end.min(MAX_DEPTH),
    }
  }

  #[inline]
  pub fn cold_depth_begin(&self) -> usize {
    self.base_depth_end
  }

  #[inline]
  pub fn is_null(&self, depth: usize) -> bool {
    depth < self.null_depth_end
  }

  #[inline]
  pub fn is_base(&self, depth: usize) -> bool {
    depth < self.base_depth_end
  }

  /// Reject geometry that cannot produce aligned chunks.
  pub fn validate(&self) -> Result<()> {
    let fail = |msg: String| Err(Error::Config(msg));

    if self.dimensions != 2 && self.dimensions != 3 {
      return fail(format!("dimensions must be 2 or 3, got {}", self.dimensions));
    }
    if self.node_capacity == 0 {
      return fail("node_capacity must be at least 1".into());
    }
    if self.base_depth_end < self.null_depth_end {
      return fail(format!(
        "base_depth_end {} is below null_depth_end {}",
        self.base_depth_end, self.null_depth_end
      ));
    }
    if self.base_depth_end >= MAX_DEPTH {
      return fail(format!("base_depth_end must be below {MAX_DEPTH}"));
    }
    let Some(k) = self.chunk_exponent() else {
      return fail(format!(
        "nodes_per_chunk {} is not a power of {}",
        self.nodes_per_chunk,
        self.factor()
      ));
    };
    if k > self.base_depth_end {
      return fail(format!(
        "nodes_per_chunk {} exceeds the node count of depth {}",
        self.nodes_per_chunk, self.base_depth_end
      ));
    }
    if self.cold_depth_end != 0
      && (self.cold_depth_end <= self.base_depth_end || self.cold_depth_end > MAX_DEPTH)
    {
      return fail(format!(
        "cold_depth_end {} must be 0 or in ({}, {MAX_DEPTH}]",
        self.cold_depth_end, self.base_depth_end
      ));
    }
    if let ChunkPolicy::Dynamic { sparse_depth_begin } = self.chunk_policy {
      if sparse_depth_begin < self.base_depth_end {
        return fail(format!(
          "sparse_depth_begin {sparse_depth_begin} is below base_depth_end {}",
          self.base_depth_end
        ));
      }
    }
    Ok(())
  }

  /// Fail with a `Mismatch` unless `other` is identical.
  pub fn ensure_same(&self, other: &Structure) -> Result<()> {
    if self != other {
      return Err(Error::mismatch(
        "structure",
        format!("{self:?} vs {other:?}"),
      ));
    }
    Ok(())
  }
}

// =============================================================================
// Chunk addressing
// =============================================================================

/// Address of one cold chunk: the first node id it spans and its depth.
///
/// Orders by depth, then id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
  pub depth: usize,
  pub id: Id,
}

impl ChunkKey {
  pub fn new(depth: usize, id: Id) -> Self {
    Self { depth, id }
  }

  /// Storage key for this chunk under `postfix`.
  pub fn storage_key(&self, postfix: &str) -> String {
    format!("{}{}", self.id, postfix)
  }
}

impl fmt::Display for ChunkKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.id, self.depth)
  }
}

/// Validated structure plus precomputed level offsets.
#[derive(Clone, Debug)]
pub struct ChunkLayout {
  structure: Structure,
  chunk_exponent: usize,
  level_begins: Vec<Id>,
}

impl ChunkLayout {
  pub fn new(structure: Structure) -> Result<Self> {
    structure.validate()?;
    let chunk_exponent = structure.chunk_exponent().unwrap_or(0);
    let level_begins = (0..=MAX_DEPTH)
      .map(|depth| level_begin(depth, structure.dimensions))
      .collect();
    Ok(Self {
      structure,
      chunk_exponent,
      level_begins,
    })
  }

  #[inline]
  pub fn structure(&self) -> &Structure {
    &self.structure
  }

  /// First node id at `depth`.
  #[inline]
  pub fn level_begin(&self, depth: usize) -> &Id {
    &self.level_begins[depth.min(MAX_DEPTH)]
  }

  /// Depth of node `id`.
  pub fn depth_of(&self, id: &Id) -> usize {
    self
      .level_begins
      .partition_point(|begin| begin <= id)
      .saturating_sub(1)
  }

  /// `k` such that a chunk at `depth` spans `factor^k` nodes.
  pub fn chunk_exponent(&self, depth: usize) -> usize {
    let k = match self.structure.chunk_policy {
      ChunkPolicy::Static => self.chunk_exponent,
      ChunkPolicy::Dynamic { sparse_depth_begin } if depth > sparse_depth_begin => {
        self.chunk_exponent + (depth - sparse_depth_begin)
      }
      ChunkPolicy::Dynamic { .. } => self.chunk_exponent,
    };
    k.min(depth)
  }

  /// Chunk containing node `id` at `depth`.
  pub fn chunk_key(&self, id: &Id, depth: usize) -> ChunkKey {
    let begin = self.level_begin(depth);
    let bits = self.structure.dimensions as usize * self.chunk_exponent(depth);
    let position = id.checked_sub(begin).unwrap_or_default();
    let aligned = position.shr(bits).shl(bits);
    ChunkKey::new(depth, begin.add(&aligned))
  }
}

#[cfg(test)]
#[path = "structure_test.rs"]
mod structure_test;
