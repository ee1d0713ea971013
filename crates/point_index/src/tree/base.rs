//! BaseChunk - the always-resident upper levels.
//!
//! Every depth from `null_depth_end` to `base_depth_end` lives in one
//! chunk that is loaded at startup and written whole on save.

use super::chunk::{Chunk, Node, NodeRules, Placement};
use super::hierarchy::Hierarchy;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::PointRef;
use crate::storage::Endpoint;

#[derive(Clone, Debug, Default)]
pub struct BaseChunk {
  chunk: Chunk,
}

impl BaseChunk {
  pub fn new(record_size: usize) -> Self {
    Self {
      chunk: Chunk::new(record_size),
    }
  }

  /// Load from `key`, or start empty if the key does not exist.
  pub fn load(endpoint: &dyn Endpoint, key: &str, record_size: usize) -> Result<Self> {
    match endpoint.get(key)? {
      Some(bytes) => Ok(Self {
        chunk: Chunk::decode(&bytes, key)?,
      }),
      None => Ok(Self::new(record_size)),
    }
  }

  pub fn save(&self, endpoint: &dyn Endpoint, key: &str) -> Result<()> {
    endpoint.put(key, &self.chunk.encode())
  }

  #[inline]
  pub fn place(&mut self, id: &Id, point: PointRef<'_>, rules: NodeRules) -> Placement {
    self.chunk.place(id, point, rules)
  }

  pub fn node(&self, id: &Id) -> Option<&Node> {
    self.chunk.node(id)
  }

  pub fn chunk(&self) -> &Chunk {
    &self.chunk
  }

  pub fn counts(&self) -> Hierarchy {
    self.chunk.counts()
  }

  /// Union with the base of a spatially disjoint build.
  pub fn merge(&mut self, other: &BaseChunk) -> Result<()> {
    if let Some(id) = self.chunk.first_collision(&other.chunk) {
      return Err(Error::Overlap(format!("base node {id} exists in both builds")));
    }
    self.chunk.absorb_disjoint(other.chunk.clone());
    Ok(())
  }
}
