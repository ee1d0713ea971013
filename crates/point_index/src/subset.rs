//! Subset - one spatial partition of a distributed build.
//!
//! A subset `{ id, of }` owns node `id` of the `of` nodes at depth `s`,
//! where `of = factor^s`. The id's base-`factor` digits, most significant
//! first, are the directions taken from the root.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::error::{Error, Result};
use crate::structure::{ChunkPolicy, Structure};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subset {
  pub id: u64,
  pub of: u64,
}

impl Subset {
  pub fn new(id: u64, of: u64) -> Self {
    Self { id, of }
  }

  /// Depth whose nodes are the subset regions, if `of` is a power of the
  /// factor for `dims`.
  pub fn depth(&self, dims: u32) -> Option<usize> {
    if self.of < 2 || !self.of.is_power_of_two() {
      return None;
    }
    let bits = self.of.trailing_zeros();
    (bits % dims == 0).then_some((bits / dims) as usize)
  }

  /// Check that every node and cold chunk at or below the subset depth
  /// falls inside exactly one subset region.
  pub fn validate(&self, structure: &Structure) -> Result<()> {
    let dims = structure.dimensions;
    let Some(s) = self.depth(dims) else {
      return Err(Error::Config(format!(
        "subset count {} is not a power of {}",
        self.of,
        structure.factor()
      )));
    };
    if self.id >= self.of {
      return Err(Error::Config(format!(
        "subset id {} out of range for {} subsets",
        self.id, self.of
      )));
    }
    if structure.null_depth_end < s {
      return Err(Error::Config(format!(
        "{} subsets require null_depth_end >= {s}",
        self.of
      )));
    }
    let k = structure.chunk_exponent().unwrap_or(0);
    if structure.base_depth_end < k + s {
      return Err(Error::Config(format!(
        "{} subsets require base_depth_end >= {}",
        self.of,
        k + s
      )));
    }
    if let ChunkPolicy::Dynamic { sparse_depth_begin } = structure.chunk_policy {
      if sparse_depth_begin < k + s {
        return Err(Error::Config(format!(
          "{} subsets require sparse_depth_begin >= {}",
          self.of,
          k + s
        )));
      }
    }
    Ok(())
  }

  /// Directions from the root to the subset region.
  fn directions(&self, dims: u32) -> impl Iterator<Item = u64> + '_ {
    let s = self.depth(dims).unwrap_or(0);
    let mask = (1u64 << dims) - 1;
    (0..s)
      .rev()
      .map(move |level| (self.id >> (dims as usize * level)) & mask)
  }

  /// Region of `root` owned by this subset.
  pub fn bbox(&self, root: &BBox, dims: u32) -> BBox {
    self
      .directions(dims)
      .fold(*root, |bbox, dir| bbox.child(dir, dims == 3))
  }

  /// True if `point` (inside `root`) belongs to this subset.
  ///
  /// Uses the same descent arithmetic as the climber, so a point on a
  /// region boundary is owned by exactly one subset.
  pub fn owns(&self, root: &BBox, dims: u32, point: DVec3) -> bool {
    let mut bbox = *root;
    for dir in self.directions(dims) {
      let actual = bbox.direction(point, dims == 3);
      if actual != dir {
        return false;
      }
      bbox = bbox.child(actual, dims == 3);
    }
    true
  }
}
