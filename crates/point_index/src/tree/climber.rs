//! Climber - traversal cursor from the root toward one point.
//!
//! Holds the current node id, depth and box. `descend` moves one level
//! toward the target; nothing else changes until the registry commits an
//! insertion at the node the climber has reached. One climber is reused
//! for every point a worker inserts.

use glam::DVec3;

use crate::bbox::BBox;
use crate::id::Id;

#[derive(Clone, Debug)]
pub struct Climber {
  root: BBox,
  dims: u32,
  target: DVec3,
  id: Id,
  depth: usize,
  bbox: BBox,
}

impl Climber {
  pub fn new(root: BBox, dims: u32) -> Self {
    Self {
      root,
      dims,
      target: root.min,
      id: Id::zero(),
      depth: 0,
      bbox: root,
    }
  }

  /// Move back to the root and aim at `point`.
  pub fn reset(&mut self, point: DVec3) {
    self.target = point;
    self.id = Id::zero();
    self.depth = 0;
    self.bbox = self.root;
  }

  /// Copy positioned at the same node, aimed at a different point.
  pub fn retarget(&self, point: DVec3) -> Self {
    Self {
      target: point,
      ..self.clone()
    }
  }

  /// Step into the child containing the target.
  pub fn descend(&mut self) {
    let is_3d = self.dims == 3;
    let dir = self.bbox.direction(self.target, is_3d);
    self.id = self.id.child(self.dims, dir);
    self.bbox = self.bbox.child(dir, is_3d);
    self.depth += 1;
  }

  #[inline]
  pub fn id(&self) -> &Id {
    &self.id
  }

  #[inline]
  pub fn depth(&self) -> usize {
    self.depth
  }

  #[inline]
  pub fn bbox(&self) -> &BBox {
    &self.bbox
  }

  #[inline]
  pub fn target(&self) -> DVec3 {
    self.target
  }

  #[inline]
  pub fn dims(&self) -> u32 {
    self.dims
  }
}
