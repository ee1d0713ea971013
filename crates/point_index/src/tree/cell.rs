//! Cell - point storage at one tree node.
//!
//! Stored column-wise so a node never allocates per point: coordinates,
//! origins and packed attribute bytes each live in one vector.

use glam::DVec3;

use crate::point::{Origin, PointRef};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cell {
  points: Vec<DVec3>,
  origins: Vec<Origin>,
  data: Vec<u8>,
  record_size: usize,
}

impl Cell {
  pub fn new(record_size: usize) -> Self {
    Self {
      points: Vec::new(),
      origins: Vec::new(),
      data: Vec::new(),
      record_size,
    }
  }

  pub fn with_capacity(record_size: usize, capacity: usize) -> Self {
    Self {
      points: Vec::with_capacity(capacity),
      origins: Vec::with_capacity(capacity),
      data: Vec::with_capacity(capacity * record_size),
      record_size,
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.points.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  #[inline]
  pub fn record_size(&self) -> usize {
    self.record_size
  }

  /// Append a point. Attribute bytes are truncated or zero-padded to the
  /// record size.
  pub fn push(&mut self, point: PointRef<'_>) {
    self.points.push(point.point);
    self.origins.push(point.origin);
    let take = point.data.len().min(self.record_size);
    self.data.extend_from_slice(&point.data[..take]);
    self.data.resize(self.points.len() * self.record_size, 0);
  }

  /// True if a point with exactly these coordinates is stored here.
  pub fn contains(&self, point: DVec3) -> bool {
    self.points.iter().any(|p| *p == point)
  }

  #[inline]
  pub fn get(&self, i: usize) -> PointRef<'_> {
    let start = i * self.record_size;
    PointRef::new(
      self.points[i],
      self.origins[i],
      &self.data[start..start + self.record_size],
    )
  }

  pub fn iter(&self) -> impl Iterator<Item = PointRef<'_>> + '_ {
    (0..self.len()).map(move |i| self.get(i))
  }

  pub fn points(&self) -> &[DVec3] {
    &self.points
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_push_and_read_back() {
    let mut cell = Cell::new(2);
    cell.push(PointRef::new(DVec3::ONE, 4, &[1, 2]));
    cell.push(PointRef::new(DVec3::ZERO, 5, &[3]));
    assert_eq!(cell.len(), 2);
    let second = cell.get(1);
    assert_eq!(second.origin, 5);
    assert_eq!(second.data, &[3, 0]);
    assert!(cell.contains(DVec3::ONE));
    assert!(!cell.contains(DVec3::X));
  }

  #[test]
  fn test_iter_preserves_order() {
    let mut cell = Cell::new(0);
    for i in 0..4 {
      cell.push(PointRef::new(DVec3::splat(i as f64), i, &[]));
    }
    let origins: Vec<_> = cell.iter().map(|p| p.origin).collect();
    assert_eq!(origins, vec![0, 1, 2, 3]);
  }
}
