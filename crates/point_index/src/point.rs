//! Point records and the attribute schema.
//!
//! Coordinates always travel as `DVec3`. Every other attribute is packed
//! into a fixed-size byte record described by a [`Schema`].

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Stable index of a source file within the manifest.
pub type Origin = u64;

/// Storage type of one attribute dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimType {
  U8,
  I8,
  U16,
  I16,
  U32,
  I32,
  U64,
  I64,
  F32,
  F64,
}

impl DimType {
  /// Packed size in bytes.
  pub const fn size(self) -> usize {
    match self {
      Self::U8 | Self::I8 => 1,
      Self::U16 | Self::I16 => 2,
      Self::U32 | Self::I32 | Self::F32 => 4,
      Self::U64 | Self::I64 | Self::F64 => 8,
    }
  }
}

/// A named attribute dimension.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: DimType,
}

impl Dimension {
  pub fn new(name: impl Into<String>, kind: DimType) -> Self {
    Self {
      name: name.into(),
      kind,
    }
  }
}

/// Attribute layout of every point record in a build.
///
/// X, Y and Z are implicit and never listed here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
  #[serde(default)]
  pub dims: Vec<Dimension>,
}

impl Schema {
  pub fn new(dims: Vec<Dimension>) -> Self {
    Self { dims }
  }

  /// Packed attribute bytes per point.
  pub fn record_size(&self) -> usize {
    self.dims.iter().map(|d| d.kind.size()).sum()
  }

  /// Byte offset of a named dimension within a record.
  pub fn offset_of(&self, name: &str) -> Option<usize> {
    let mut offset = 0;
    for dim in &self.dims {
      if dim.name == name {
        return Some(offset);
      }
      offset += dim.kind.size();
    }
    None
  }
}

/// Borrowed view of one point on its way into the registry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointRef<'a> {
  pub point: DVec3,
  pub origin: Origin,
  pub data: &'a [u8],
}

impl<'a> PointRef<'a> {
  pub fn new(point: DVec3, origin: Origin, data: &'a [u8]) -> Self {
    Self {
      point,
      origin,
      data,
    }
  }
}

/// A batch of points streamed from the executor.
///
/// Attribute bytes are packed back to back, `record_size` per point.
#[derive(Clone, Debug, Default)]
pub struct PointBuffer {
  points: Vec<DVec3>,
  data: Vec<u8>,
  record_size: usize,
}

impl PointBuffer {
  pub fn new(record_size: usize) -> Self {
    Self {
      points: Vec::new(),
      data: Vec::new(),
      record_size,
    }
  }

  pub fn with_capacity(record_size: usize, capacity: usize) -> Self {
    Self {
      points: Vec::with_capacity(capacity),
      data: Vec::with_capacity(capacity * record_size),
      record_size,
    }
  }

  /// Append a point. `data` is truncated or zero-padded to the record size.
  pub fn push(&mut self, point: DVec3, data: &[u8]) {
    self.points.push(point);
    let take = data.len().min(self.record_size);
    self.data.extend_from_slice(&data[..take]);
    self.data.resize(self.points.len() * self.record_size, 0);
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

  pub fn capacity(&self) -> usize {
    self.points.capacity()
  }

  /// Empty the buffer, keeping its allocation. Also re-targets the record
  /// size so a recycled buffer can serve another schema.
  pub fn reset(&mut self, record_size: usize) {
    self.points.clear();
    self.data.clear();
    self.record_size = record_size;
  }

  /// Point `i` and its attribute bytes.
  #[inline]
  pub fn get(&self, i: usize) -> (DVec3, &[u8]) {
    let start = i * self.record_size;
    (self.points[i], &self.data[start..start + self.record_size])
  }

  pub fn iter(&self) -> impl Iterator<Item = (DVec3, &[u8])> + '_ {
    (0..self.len()).map(move |i| self.get(i))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_size_and_offsets() {
    let schema = Schema::new(vec![
      Dimension::new("Intensity", DimType::U16),
      Dimension::new("Classification", DimType::U8),
      Dimension::new("GpsTime", DimType::F64),
    ]);
    assert_eq!(schema.record_size(), 11);
    assert_eq!(schema.offset_of("Classification"), Some(2));
    assert_eq!(schema.offset_of("GpsTime"), Some(3));
    assert_eq!(schema.offset_of("Red"), None);
  }

  #[test]
  fn test_buffer_pads_short_records() {
    let mut buffer = PointBuffer::new(4);
    buffer.push(DVec3::ONE, &[1, 2]);
    buffer.push(DVec3::ZERO, &[9, 9, 9, 9, 9]);
    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.get(0).1, &[1, 2, 0, 0]);
    assert_eq!(buffer.get(1).1, &[9, 9, 9, 9]);
  }

  #[test]
  fn test_zero_width_records() {
    let mut buffer = PointBuffer::new(0);
    buffer.push(DVec3::X, &[]);
    buffer.push(DVec3::Y, &[7]);
    let collected: Vec<_> = buffer.iter().collect();
    assert_eq!(collected.len(), 2);
    assert!(collected[1].1.is_empty());
  }

  #[test]
  fn test_schema_serde_uses_type_key() {
    let schema = Schema::new(vec![Dimension::new("Intensity", DimType::U16)]);
    let json = serde_json::to_value(&schema).unwrap();
    assert_eq!(json["dims"][0]["type"], "u16");
  }
}
