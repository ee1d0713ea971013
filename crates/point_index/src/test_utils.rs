//! Test fixtures: an executor serving point files from memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bbox::BBox;
use crate::constants::BUFFER_POINTS;
use crate::error::{Error, Result};
use crate::executor::{Executor, Preview, Reprojection};
use crate::point::{PointBuffer, Schema};
use crate::pools::Arena;
use crate::storage::{Endpoint, MemoryEndpoint};

#[derive(Clone, Debug, Default)]
struct MemoryFile {
  points: Vec<DVec3>,
  srs: Option<String>,
  broken: bool,
}

/// Serves named point lists. Attribute bytes are always zero.
#[derive(Clone, Debug, Default)]
pub struct MemoryExecutor {
  files: BTreeMap<String, MemoryFile>,
}

impl MemoryExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, path: &str, points: Vec<DVec3>) -> &mut Self {
    self.files.insert(
      path.to_string(),
      MemoryFile {
        points,
        ..MemoryFile::default()
      },
    );
    self
  }

  /// `count` seeded random points inside `bounds`.
  pub fn add_random(&mut self, path: &str, seed: u64, count: usize, bounds: BBox) -> &mut Self {
    self.add(path, random_points(seed, count, bounds))
  }

  pub fn add_with_srs(&mut self, path: &str, points: Vec<DVec3>, srs: &str) -> &mut Self {
    self.add(path, points);
    if let Some(file) = self.files.get_mut(path) {
      file.srs = Some(srs.to_string());
    }
    self
  }

  /// A file whose preview works but whose contents cannot be read.
  pub fn add_broken(&mut self, path: &str, points: Vec<DVec3>) -> &mut Self {
    self.add(path, points);
    if let Some(file) = self.files.get_mut(path) {
      file.broken = true;
    }
    self
  }

  pub fn into_arc(self) -> Arc<dyn Executor> {
    Arc::new(self)
  }

  fn file(&self, path: &str) -> Result<&MemoryFile> {
    self
      .files
      .get(path)
      .ok_or_else(|| Error::Executor(format!("{path}: no such file")))
  }
}

impl Executor for MemoryExecutor {
  fn preview(&self, path: &str) -> Result<Option<Preview>> {
    let file = self.file(path)?;
    let mut bounds = BBox::empty();
    for point in &file.points {
      bounds.grow(*point);
    }
    if bounds.is_empty() {
      return Ok(None);
    }
    Ok(Some(Preview {
      bounds,
      num_points: file.points.len() as u64,
      srs: file.srs.clone(),
    }))
  }

  fn run(
    &self,
    path: &str,
    schema: &Schema,
    _reprojection: Option<&Reprojection>,
    arena: &mut Arena,
    sink: &mut dyn FnMut(&PointBuffer) -> Result<()>,
  ) -> Result<u64> {
    let file = self.file(path)?;
    if file.broken {
      return Err(Error::Executor(format!("{path}: corrupt contents")));
    }
    let record = vec![0u8; schema.record_size()];
    let mut buffer = arena.take();
    for point in &file.points {
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
    Ok(file.points.len() as u64)
  }
}

pub fn random_points(seed: u64, count: usize, bounds: BBox) -> Vec<DVec3> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|_| {
      DVec3::new(
        rng.random_range(bounds.min.x..=bounds.max.x),
        rng.random_range(bounds.min.y..=bounds.max.y),
        rng.random_range(bounds.min.z..=bounds.max.z),
      )
    })
    .collect()
}

pub fn cube(min: f64, max: f64) -> BBox {
  BBox::new(DVec3::splat(min), DVec3::splat(max))
}

pub fn memory_endpoint() -> Arc<dyn Endpoint> {
  Arc::new(MemoryEndpoint::new())
}
