//! Chunk - a set of tree nodes stored and evicted together.
//!
//! Both tiers keep their nodes in a `Chunk`: the base tier as one chunk
//! spanning every resident depth, the cold tier as one chunk per
//! `ChunkKey`.
//!
//! # Binary layout (little-endian)
//!
//! ```text
//! magic        [u8; 4]   "PIC1"
//! record_size  u32
//! node_count   u32
//! per node:
//!   limb_count u8, limbs [u64; limb_count]
//!   kind       u8        0 = branch, 1 = leaf
//!   leaf only:
//!     count    u32
//!     count x (x f64, y f64, z f64, origin u64, data [u8; record_size])
//! ```

use std::collections::BTreeMap;

use glam::DVec3;

use super::cell::Cell;
use super::hierarchy::Hierarchy;
use crate::constants::CHUNK_MAGIC;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::PointRef;

const KIND_BRANCH: u8 = 0;
const KIND_LEAF: u8 = 1;

/// A tree node: points, or a pointer to deeper levels.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
  Leaf(Cell),
  Branch,
}

/// What happened when a point reached a node.
#[derive(Debug)]
pub enum Placement {
  Inserted,
  /// Identical coordinates already present; point dropped.
  Duplicate,
  /// Node is a branch; continue one level deeper.
  Descend,
  /// Node overflowed and is now a branch. Its former points must be
  /// re-inserted one level deeper, followed by the point itself.
  Split(Cell),
}

/// Insertion policy shared by every node.
#[derive(Clone, Copy, Debug)]
pub struct NodeRules {
  pub capacity: usize,
  pub discard_duplicates: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chunk {
  nodes: BTreeMap<Id, Node>,
  record_size: usize,
}

impl Chunk {
  pub fn new(record_size: usize) -> Self {
    Self {
      nodes: BTreeMap::new(),
      record_size,
    }
  }

  /// Offer `point` to node `id`.
  pub fn place(&mut self, id: &Id, point: PointRef<'_>, rules: NodeRules) -> Placement {
    let Some(node) = self.nodes.get_mut(id) else {
      let mut cell = Cell::new(self.record_size);
      cell.push(point);
      self.nodes.insert(id.clone(), Node::Leaf(cell));
      return Placement::Inserted;
    };
    let cell = match node {
      Node::Branch => return Placement::Descend,
      Node::Leaf(cell) => cell,
    };
    if rules.discard_duplicates && cell.contains(point.point) {
      return Placement::Duplicate;
    }
    if cell.len() < rules.capacity {
      cell.push(point);
      return Placement::Inserted;
    }
    match std::mem::replace(node, Node::Branch) {
      Node::Leaf(cell) => Placement::Split(cell),
      Node::Branch => Placement::Descend,
    }
  }

  #[inline]
  pub fn node(&self, id: &Id) -> Option<&Node> {
    self.nodes.get(id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = (&Id, &Node)> {
    self.nodes.iter()
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn point_count(&self) -> u64 {
    self
      .nodes
      .values()
      .map(|node| match node {
        Node::Leaf(cell) => cell.len() as u64,
        Node::Branch => 0,
      })
      .sum()
  }

  /// Per-node point counts; branches count as 0.
  pub fn counts(&self) -> Hierarchy {
    self
      .nodes
      .iter()
      .map(|(id, node)| {
        let count = match node {
          Node::Leaf(cell) => cell.len() as u64,
          Node::Branch => 0,
        };
        (id.clone(), count)
      })
      .collect()
  }

  /// First node id present in both chunks.
  pub fn first_collision<'a>(&self, other: &'a Chunk) -> Option<&'a Id> {
    other.nodes.keys().find(|id| self.nodes.contains_key(*id))
  }

  /// Union with a chunk covering different nodes. Call
  /// `first_collision` first; colliding nodes are overwritten.
  pub fn absorb_disjoint(&mut self, other: Chunk) {
    self.nodes.extend(other.nodes);
  }

  /// Remove every node, returning the points held in leaves.
  pub fn drain_leaves(&mut self) -> Vec<Cell> {
    std::mem::take(&mut self.nodes)
      .into_values()
      .filter_map(|node| match node {
        Node::Leaf(cell) => Some(cell),
        Node::Branch => None,
      })
      .collect()
  }

  // ===========================================================================
  // Codec
  // ===========================================================================

  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + self.nodes.len() * 32);
    out.extend_from_slice(&CHUNK_MAGIC);
    out.extend_from_slice(&(self.record_size as u32).to_le_bytes());
    out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
    for (id, node) in &self.nodes {
      let limbs = id.limbs();
      out.push(limbs.len() as u8);
      for limb in limbs {
        out.extend_from_slice(&limb.to_le_bytes());
      }
      match node {
        Node::Branch => out.push(KIND_BRANCH),
        Node::Leaf(cell) => {
          out.push(KIND_LEAF);
          out.extend_from_slice(&(cell.len() as u32).to_le_bytes());
          for point in cell.iter() {
            out.extend_from_slice(&point.point.x.to_le_bytes());
            out.extend_from_slice(&point.point.y.to_le_bytes());
            out.extend_from_slice(&point.point.z.to_le_bytes());
            out.extend_from_slice(&point.origin.to_le_bytes());
            out.extend_from_slice(point.data);
          }
        }
      }
    }
    out
  }

  /// Decode bytes read from storage key `key`.
  pub fn decode(bytes: &[u8], key: &str) -> Result<Self> {
    let mut reader = Reader { bytes, pos: 0, key };
    if reader.take(4)? != CHUNK_MAGIC {
      return Err(Error::corrupt(key, "bad magic"));
    }
    let record_size = reader.u32()? as usize;
    let node_count = reader.u32()?;

    let mut nodes = BTreeMap::new();
    let mut limbs = Vec::new();
    for _ in 0..node_count {
      let limb_count = reader.u8()?;
      limbs.clear();
      for _ in 0..limb_count {
        limbs.push(reader.u64()?);
      }
      let id = Id::from_le_limbs(&limbs);
      let node = match reader.u8()? {
        KIND_BRANCH => Node::Branch,
        KIND_LEAF => {
          let count = reader.u32()? as usize;
          let mut cell = Cell::with_capacity(record_size, count.min(bytes.len() / 32));
          for _ in 0..count {
            let point = DVec3::new(reader.f64()?, reader.f64()?, reader.f64()?);
            let origin = reader.u64()?;
            let data = reader.take(record_size)?;
            cell.push(PointRef::new(point, origin, data));
          }
          Node::Leaf(cell)
        }
        other => return Err(Error::corrupt(key, format!("unknown node kind {other}"))),
      };
      nodes.insert(id, node);
    }
    if reader.pos != bytes.len() {
      return Err(Error::corrupt(key, "trailing bytes"));
    }
    Ok(Self { nodes, record_size })
  }
}

struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
  key: &'a str,
}

impl<'a> Reader<'a> {
  fn take(&mut self, n: usize) -> Result<&'a [u8]> {
    let end = self.pos + n;
    if end > self.bytes.len() {
      return Err(Error::corrupt(self.key, "truncated"));
    }
    let slice = &self.bytes[self.pos..end];
    self.pos = end;
    Ok(slice)
  }

  fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    buf.copy_from_slice(self.take(N)?);
    Ok(buf)
  }

  fn u8(&mut self) -> Result<u8> {
    Ok(self.take(1)?[0])
  }

  fn u32(&mut self) -> Result<u32> {
    Ok(u32::from_le_bytes(self.array()?))
  }

  fn u64(&mut self) -> Result<u64> {
    Ok(u64::from_le_bytes(self.array()?))
  }

  fn f64(&mut self) -> Result<f64> {
    Ok(f64::from_le_bytes(self.array()?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const RULES: NodeRules = NodeRules {
    capacity: 2,
    discard_duplicates: true,
  };

  fn p(x: f64) -> PointRef<'static> {
    PointRef::new(DVec3::splat(x), 0, &[])
  }

  #[test]
  fn test_leaf_fills_then_splits() {
    let mut chunk = Chunk::new(0);
    let id = Id::from(9);
    assert!(matches!(chunk.place(&id, p(1.0), RULES), Placement::Inserted));
    assert!(matches!(chunk.place(&id, p(2.0), RULES), Placement::Inserted));
    match chunk.place(&id, p(3.0), RULES) {
      Placement::Split(cell) => assert_eq!(cell.len(), 2),
      other => panic!("expected split, got {other:?}"),
    }
    assert_eq!(chunk.node(&id), Some(&Node::Branch));
    assert!(matches!(chunk.place(&id, p(4.0), RULES), Placement::Descend));
  }

  #[test]
  fn test_duplicate_is_dropped() {
    let mut chunk = Chunk::new(0);
    let id = Id::from(1);
    chunk.place(&id, p(1.0), RULES);
    assert!(matches!(chunk.place(&id, p(1.0), RULES), Placement::Duplicate));
    assert_eq!(chunk.point_count(), 1);

    let keep = NodeRules {
      discard_duplicates: false,
      ..RULES
    };
    assert!(matches!(chunk.place(&id, p(1.0), keep), Placement::Inserted));
    assert_eq!(chunk.point_count(), 2);
  }

  #[test]
  fn test_codec_round_trip_with_wide_ids() {
    let mut chunk = Chunk::new(3);
    let wide = Id::from(1).shl(80);
    chunk.place(&wide, PointRef::new(DVec3::new(1.5, -2.0, 3.25), 7, &[1, 2, 3]), RULES);
    chunk.place(&Id::from(12), PointRef::new(DVec3::ZERO, 1, &[4, 5, 6]), RULES);
    chunk.nodes.insert(Id::from(2), Node::Branch);

    let bytes = chunk.encode();
    let back = Chunk::decode(&bytes, "test").unwrap();
    assert_eq!(back, chunk);
  }

  #[test]
  fn test_decode_rejects_corruption() {
    let mut chunk = Chunk::new(0);
    chunk.place(&Id::from(1), p(1.0), RULES);
    let bytes = chunk.encode();

    let truncated = &bytes[..bytes.len() - 3];
    assert!(matches!(
      Chunk::decode(truncated, "k"),
      Err(Error::Corrupt { .. })
    ));

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    assert!(Chunk::decode(&bad_magic, "k").is_err());

    let mut trailing = bytes;
    trailing.push(0);
    assert!(Chunk::decode(&trailing, "k").is_err());
  }

  #[test]
  fn test_counts_and_collisions() {
    let mut a = Chunk::new(0);
    a.place(&Id::from(1), p(1.0), RULES);
    a.nodes.insert(Id::from(0), Node::Branch);
    let mut b = Chunk::new(0);
    b.place(&Id::from(2), p(2.0), RULES);

    assert_eq!(a.first_collision(&b), None);
    a.absorb_disjoint(b.clone());
    assert_eq!(a.first_collision(&b), Some(&Id::from(2)));

    let counts = a.counts();
    assert_eq!(counts.get(&Id::from(0)), Some(0));
    assert_eq!(counts.get(&Id::from(2)), Some(1));
    assert_eq!(counts.point_count(), 2);
  }
}
