//! Executor - the boundary to point-format decoding.
//!
//! The index never parses point files itself. An `Executor` reports cheap
//! file metadata (`preview`) and streams decoded points into buffers
//! (`run`). `XyzExecutor` handles whitespace-delimited text files:
//!
//! ```text
//! # srs EPSG:26915
//! x y z [attribute ...]
//! ```

use std::fs;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::constants::BUFFER_POINTS;
use crate::error::{Error, Result};
use crate::point::{DimType, PointBuffer, Schema};
use crate::pools::Arena;

/// Metadata available without decoding every point.
#[derive(Clone, Debug, PartialEq)]
pub struct Preview {
  pub bounds: BBox,
  pub num_points: u64,
  pub srs: Option<String>,
}

/// Requested coordinate transformation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reprojection {
  /// Source SRS. `None` trusts whatever the file declares.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub in_srs: Option<String>,
  pub out_srs: String,
  /// Use `in_srs` even when the file declares something else.
  #[serde(default)]
  pub hammer: bool,
}

impl Reprojection {
  pub fn new(in_srs: Option<String>, out_srs: impl Into<String>) -> Self {
    Self {
      in_srs,
      out_srs: out_srs.into(),
      hammer: false,
    }
  }

  /// Source SRS to use for a file that declares `file_srs`.
  pub fn source<'a>(&'a self, file_srs: Option<&'a str>) -> Option<&'a str> {
    if self.hammer {
      self.in_srs.as_deref()
    } else {
      file_srs.or(self.in_srs.as_deref())
    }
  }
}

/// Point decoding collaborator.
pub trait Executor: Send + Sync {
  /// Bounds, count and SRS of `path`, if they can be read cheaply.
  fn preview(&self, path: &str) -> Result<Option<Preview>>;

  /// Decode `path`, handing batches of points to `sink`. Attribute bytes
  /// follow `schema`. Returns the number of points read.
  fn run(
    &self,
    path: &str,
    schema: &Schema,
    reprojection: Option<&Reprojection>,
    arena: &mut Arena,
    sink: &mut dyn FnMut(&PointBuffer) -> Result<()>,
  ) -> Result<u64>;
}

/// Union of every previewable file's bounds.
pub fn infer_bounds<'a, I>(executor: &dyn Executor, paths: I) -> Result<BBox>
where
  I: IntoIterator<Item = &'a str>,
{
  let mut bounds = BBox::empty();
  for path in paths {
    match executor.preview(path) {
      Ok(Some(preview)) => bounds.grow_bbox(&preview.bounds),
      Ok(None) => {}
      Err(e) if e.is_per_file() => tracing::warn!(path, error = %e, "skipping file while inferring bounds"),
      Err(e) => return Err(e),
    }
  }
  if bounds.is_empty() {
    return Err(Error::Config("no input file reported bounds".into()));
  }
  Ok(bounds)
}

// =============================================================================
// Text executor
// =============================================================================

/// Reads `x y z attr...` text files from local disk.
///
/// Attribute columns map to schema dimensions in order; missing columns
/// are zero. Only identity reprojections are supported.
#[derive(Clone, Copy, Debug, Default)]
pub struct XyzExecutor;

struct Parsed {
  points: Vec<(DVec3, Vec<f64>)>,
  srs: Option<String>,
}

impl XyzExecutor {
  fn parse(path: &str) -> Result<Parsed> {
    let text = fs::read_to_string(path).map_err(|e| Error::Executor(format!("{path}: {e}")))?;
    let mut parsed = Parsed {
      points: Vec::new(),
      srs: None,
    };
    for (n, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      if let Some(comment) = line.strip_prefix('#') {
        if let Some(srs) = comment.trim().strip_prefix("srs") {
          parsed.srs = Some(srs.trim().to_string());
        }
        continue;
      }
      let values = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Executor(format!("{path}:{}: {e}", n + 1)))?;
      if values.len() < 3 {
        return Err(Error::Executor(format!(
          "{path}:{}: expected at least 3 columns",
          n + 1
        )));
      }
      let point = DVec3::new(values[0], values[1], values[2]);
      parsed.points.push((point, values[3..].to_vec()));
    }
    Ok(parsed)
  }

  fn check_reprojection(path: &str, srs: Option<&str>, reprojection: Option<&Reprojection>) -> Result<()> {
    let Some(reprojection) = reprojection else {
      return Ok(());
    };
    match reprojection.source(srs) {
      Some(source) if source == reprojection.out_srs => Ok(()),
      source => Err(Error::Reprojection(format!(
        "{path}: cannot transform {} to {}",
        source.unwrap_or("unknown SRS"),
        reprojection.out_srs
      ))),
    }
  }
}

impl Executor for XyzExecutor {
  fn preview(&self, path: &str) -> Result<Option<Preview>> {
    let parsed = Self::parse(path)?;
    let mut bounds = BBox::empty();
    for (point, _) in &parsed.points {
      bounds.grow(*point);
    }
    if bounds.is_empty() {
      return Ok(None);
    }
    Ok(Some(Preview {
      bounds,
      num_points: parsed.points.len() as u64,
      srs: parsed.srs,
    }))
  }

  fn run(
    &self,
    path: &str,
    schema: &Schema,
    reprojection: Option<&Reprojection>,
    arena: &mut Arena,
    sink: &mut dyn FnMut(&PointBuffer) -> Result<()>,
  ) -> Result<u64> {
    let parsed = Self::parse(path)?;
    Self::check_reprojection(path, parsed.srs.as_deref(), reprojection)?;

    let mut buffer = arena.take();
    let mut record = Vec::with_capacity(schema.record_size());
    for (point, attributes) in &parsed.points {
      record.clear();
      for (i, dim) in schema.dims.iter().enumerate() {
        encode_value(dim.kind, attributes.get(i).copied().unwrap_or(0.0), &mut record);
      }
      buffer.push(*point, &record);
      if buffer.len() >= BUFFER_POINTS {
        sink(&buffer)?;
        buffer.reset(schema.record_size());
      }
    }
    if !buffer.is_empty() {
      sink(&buffer)?;
    }
    arena.put(buffer);
    Ok(parsed.points.len() as u64)
  }
}

/// Append `value` to `out` as `kind`, little-endian. Integers saturate.
pub fn encode_value(kind: DimType, value: f64, out: &mut Vec<u8>) {
  match kind {
    DimType::U8 => out.push(value as u8),
    DimType::I8 => out.push(value as i8 as u8),
    DimType::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
    DimType::I16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
    DimType::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
    DimType::I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
    DimType::U64 => out.extend_from_slice(&(value as u64).to_le_bytes()),
    DimType::I64 => out.extend_from_slice(&(value as i64).to_le_bytes()),
    DimType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
    DimType::F64 => out.extend_from_slice(&value.to_le_bytes()),
  }
}
