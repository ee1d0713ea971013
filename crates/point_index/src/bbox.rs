//! Axis-aligned bounding box with double precision.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Double-precision axis-aligned bounding box.
///
/// Both corners are inclusive for containment. Subdivision is half-open on
/// the lower side: a coordinate equal to the midpoint belongs to the upper
/// child, so every point inside a box maps to exactly one child.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
	/// Minimum corner (inclusive).
	pub min: DVec3,
	/// Maximum corner (inclusive).
	pub max: DVec3,
}

impl BBox {
	/// Create a new box from min and max corners.
	///
	/// # Panics
	/// Debug-asserts that min <= max on all axes.
	pub fn new(min: DVec3, max: DVec3) -> Self {
		debug_assert!(
			min.x <= max.x && min.y <= max.y && min.z <= max.z,
			"BBox min must be <= max on all axes"
		);
		Self { min, max }
	}

	/// Box with inverted extents, ready for `grow`.
	pub fn empty() -> Self {
		Self {
			min: DVec3::splat(f64::INFINITY),
			max: DVec3::splat(f64::NEG_INFINITY),
		}
	}

	/// True if `grow` has never been called on an `empty()` box.
	#[inline]
	pub fn is_empty(&self) -> bool {
		self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
	}

	/// Extend to include a point.
	#[inline]
	pub fn grow(&mut self, point: DVec3) {
		self.min = self.min.min(point);
		self.max = self.max.max(point);
	}

	/// Extend to include another box.
	pub fn grow_bbox(&mut self, other: &BBox) {
		self.min = self.min.min(other.min);
		self.max = self.max.max(other.max);
	}

	/// Two boxes overlap if they share any interior or boundary points.
	#[inline]
	pub fn overlaps(&self, other: &BBox) -> bool {
		self.min.x <= other.max.x
			&& self.max.x >= other.min.x
			&& self.min.y <= other.max.y
			&& self.max.y >= other.min.y
			&& self.min.z <= other.max.z
			&& self.max.z >= other.min.z
	}

	#[inline]
	pub fn contains(&self, point: DVec3) -> bool {
		point.x >= self.min.x
			&& point.x <= self.max.x
			&& point.y >= self.min.y
			&& point.y <= self.max.y
			&& point.z >= self.min.z
			&& point.z <= self.max.z
	}

	#[inline]
	pub fn mid(&self) -> DVec3 {
		(self.min + self.max) * 0.5
	}

	/// Child direction of `point`: bit 0 for the upper X half, bit 1 for
	/// upper Y, bit 2 for upper Z. Z is ignored in 2D trees.
	#[inline]
	pub fn direction(&self, point: DVec3, is_3d: bool) -> u64 {
		let mid = self.mid();
		let mut dir = 0;
		if point.x >= mid.x {
			dir |= 1;
		}
		if point.y >= mid.y {
			dir |= 2;
		}
		if is_3d && point.z >= mid.z {
			dir |= 4;
		}
		dir
	}

	/// Child box in direction `dir`. A 2D child keeps the full Z range.
	pub fn child(&self, dir: u64, is_3d: bool) -> BBox {
		let mid = self.mid();
		let mut child = *self;
		if dir & 1 != 0 {
			child.min.x = mid.x;
		} else {
			child.max.x = mid.x;
		}
		if dir & 2 != 0 {
			child.min.y = mid.y;
		} else {
			child.max.y = mid.y;
		}
		if is_3d {
			if dir & 4 != 0 {
				child.min.z = mid.z;
			} else {
				child.max.z = mid.z;
			}
		}
		child
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn unit() -> BBox {
		BBox::new(DVec3::ZERO, DVec3::splat(10.0))
	}

	#[test]
	fn test_overlaps_touching() {
		let a = unit();
		let b = BBox::new(DVec3::splat(10.0), DVec3::splat(20.0));
		assert!(a.overlaps(&b));
		let c = BBox::new(DVec3::splat(11.0), DVec3::splat(20.0));
		assert!(!a.overlaps(&c));
	}

	#[test]
	fn test_contains_is_inclusive() {
		let aabb = unit();
		assert!(aabb.contains(DVec3::ZERO));
		assert!(aabb.contains(DVec3::splat(10.0)));
		assert!(!aabb.contains(DVec3::new(10.0, 10.0, 10.5)));
	}

	#[test]
	fn test_midpoint_goes_to_upper_child() {
		let aabb = unit();
		assert_eq!(aabb.direction(DVec3::splat(5.0), true), 7);
		assert_eq!(aabb.direction(DVec3::splat(4.999), true), 0);
		assert_eq!(aabb.direction(DVec3::new(5.0, 0.0, 10.0), true), 5);
		// Z ignored in 2D
		assert_eq!(aabb.direction(DVec3::new(5.0, 0.0, 10.0), false), 1);
	}

	#[test]
	fn test_max_corner_stays_in_upper_child() {
		let aabb = unit();
		let dir = aabb.direction(DVec3::splat(10.0), true);
		assert_eq!(dir, 7);
		assert!(aabb.child(dir, true).contains(DVec3::splat(10.0)));
	}

	#[test]
	fn test_children_tile_parent() {
		let aabb = unit();
		let mut volume = 0.0;
		for dir in 0..8 {
			let child = aabb.child(dir, true);
			let size = child.max - child.min;
			volume += size.x * size.y * size.z;
			assert_eq!(child.direction(child.mid(), true), 7);
			assert_eq!(aabb.direction(child.mid(), true), dir);
		}
		assert_eq!(volume, 1000.0);
	}

	#[test]
	fn test_2d_child_keeps_z() {
		let aabb = unit();
		let child = aabb.child(3, false);
		assert_eq!(child.min, DVec3::new(5.0, 5.0, 0.0));
		assert_eq!(child.max, DVec3::new(10.0, 10.0, 10.0));
	}

	#[test]
	fn test_grow_from_empty() {
		let mut aabb = BBox::empty();
		assert!(aabb.is_empty());
		aabb.grow(DVec3::new(1.0, 2.0, 3.0));
		aabb.grow(DVec3::new(-1.0, 5.0, 0.0));
		assert!(!aabb.is_empty());
		assert_eq!(aabb.min, DVec3::new(-1.0, 2.0, 0.0));
		assert_eq!(aabb.max, DVec3::new(1.0, 5.0, 3.0));
	}

	#[test]
	fn test_serde_round_trip() {
		let aabb = unit();
		let json = serde_json::to_string(&aabb).unwrap();
		let back: BBox = serde_json::from_str(&json).unwrap();
		assert_eq!(back, aabb);
	}
}
