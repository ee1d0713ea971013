//! Manifest - ordered source file list with split support.
//!
//! Each file's origin is its index, assigned once at construction. A split
//! narrows the origin range this build is responsible for; `split_at`
//! hands the upper half of the remaining range to another build and
//! `unsplit` takes its results back.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::constants::MIN_SPLIT_ORIGINS;
use crate::error::{Error, Result};
use crate::point::Origin;

/// Processing state of one source file. Ordered by precedence: merging two
/// views of a file keeps the greater status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
  /// Not yet processed.
  #[default]
  Outstanding,
  /// Skipped: no points, or no overlap with this build's subset.
  Omitted,
  Inserted,
  /// Bounds lie entirely outside the build bounds.
  OutOfBounds,
  /// Unreadable contents or points that could not be reprojected.
  Error,
}

/// Per-file point accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointStats {
  pub inserts: u64,
  pub out_of_bounds: u64,
  pub duplicates: u64,
}

impl PointStats {
  pub fn add(&mut self, other: &PointStats) {
    self.inserts += other.inserts;
    self.out_of_bounds += other.out_of_bounds;
    self.duplicates += other.duplicates;
  }

  /// Combine two spatial-subset views of the same file. Points outside the
  /// build bounds are seen by every subset, so they are not summed.
  fn merge_subset(&mut self, other: &PointStats) {
    self.inserts += other.inserts;
    self.duplicates += other.duplicates;
    self.out_of_bounds = self.out_of_bounds.max(other.out_of_bounds);
  }
}

/// One manifest entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
  pub path: String,
  pub origin: Origin,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bounds: Option<BBox>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub num_points: Option<u64>,
  #[serde(default)]
  pub status: FileStatus,
  #[serde(default)]
  pub stats: PointStats,
}

impl FileInfo {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      origin: 0,
      bounds: None,
      num_points: None,
      status: FileStatus::Outstanding,
      stats: PointStats::default(),
    }
  }

  pub fn with_bounds(mut self, bounds: BBox) -> Self {
    self.bounds = Some(bounds);
    self
  }

  pub fn with_num_points(mut self, num_points: u64) -> Self {
    self.num_points = Some(num_points);
    self
  }
}

/// Contiguous origin range `[begin, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Split {
  pub begin: Origin,
  pub end: Origin,
}

impl Split {
  pub fn new(begin: Origin, end: Origin) -> Self {
    Self { begin, end }
  }

  pub fn len(&self) -> u64 {
    self.end.saturating_sub(self.begin)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  files: Vec<FileInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  split: Option<Split>,
}

impl Manifest {
  /// Build a manifest, assigning origins in list order.
  pub fn new(mut files: Vec<FileInfo>) -> Self {
    for (origin, file) in files.iter_mut().enumerate() {
      file.origin = origin as Origin;
    }
    Self { files, split: None }
  }

  pub fn from_paths<I, S>(paths: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(paths.into_iter().map(FileInfo::new).collect())
  }

  #[inline]
  pub fn len(&self) -> u64 {
    self.files.len() as u64
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn files(&self) -> &[FileInfo] {
    &self.files
  }

  pub fn get(&self, origin: Origin) -> Option<&FileInfo> {
    self.files.get(origin as usize)
  }

  pub fn split(&self) -> Option<Split> {
    self.split
  }

  /// Origins this build is responsible for.
  pub fn range(&self) -> Range<Origin> {
    match self.split {
      Some(split) => split.begin..split.end,
      None => 0..self.len(),
    }
  }

  /// Fill in bounds and point count learned from a preview. Values
  /// already present are kept.
  pub fn set_info(&mut self, origin: Origin, bounds: Option<BBox>, num_points: Option<u64>) {
    if let Some(file) = self.files.get_mut(origin as usize) {
      if file.bounds.is_none() {
        file.bounds = bounds;
      }
      if file.num_points.is_none() {
        file.num_points = num_points;
      }
    }
  }

  /// Record the outcome of processing one origin.
  pub fn set(&mut self, origin: Origin, status: FileStatus, stats: PointStats) {
    if let Some(file) = self.files.get_mut(origin as usize) {
      file.status = file.status.max(status);
      file.stats.add(&stats);
    }
  }

  /// Give away the upper half of the outstanding origins at or after
  /// `cursor`. Origins already processed, or claimed before `cursor`,
  /// stay with us.
  ///
  /// Returns `None` if fewer than `MIN_SPLIT_ORIGINS` are outstanding.
  pub fn split_at(&mut self, cursor: Origin) -> Option<Split> {
    let range = self.range();
    let remaining: Vec<Origin> = (cursor.max(range.start)..range.end)
      .filter(|&o| self.get(o).is_some_and(|f| f.status == FileStatus::Outstanding))
      .collect();
    if (remaining.len() as u64) < MIN_SPLIT_ORIGINS {
      return None;
    }
    let begin = remaining[remaining.len().div_ceil(2)];
    self.split = Some(Split::new(range.start, begin));
    Some(Split::new(begin, range.end))
  }

  /// Copy restricted to `split`, for the build that takes the work.
  pub fn with_split(&self, split: Split) -> Self {
    Self {
      files: self.files.clone(),
      split: Some(split),
    }
  }

  /// Take back the results of a build created from `split_at`.
  ///
  /// `other` must cover the origins directly after ours.
  pub fn unsplit(&mut self, other: &Manifest) -> Result<()> {
    self.ensure_same_files(other)?;
    let ours = self.range();
    let theirs = other.range();
    if ours.end != theirs.start {
      return Err(Error::mismatch(
        "split",
        format!("{ours:?} is not followed by {theirs:?}"),
      ));
    }
    for origin in theirs.clone() {
      let idx = origin as usize;
      self.files[idx] = other.files[idx].clone();
    }
    self.split = if ours.start == 0 && theirs.end == self.len() {
      None
    } else {
      Some(Split::new(ours.start, theirs.end))
    };
    Ok(())
  }

  /// Combine the manifest of another spatial subset over the same files.
  pub fn merge(&mut self, other: &Manifest) -> Result<()> {
    self.ensure_same_files(other)?;
    if self.split != other.split {
      return Err(Error::mismatch(
        "split",
        format!("{:?} vs {:?}", self.split, other.split),
      ));
    }
    for (ours, theirs) in self.files.iter_mut().zip(&other.files) {
      ours.status = ours.status.max(theirs.status);
      ours.stats.merge_subset(&theirs.stats);
      if ours.bounds.is_none() {
        ours.bounds = theirs.bounds;
      }
      if ours.num_points.is_none() {
        ours.num_points = theirs.num_points;
      }
    }
    Ok(())
  }

  /// Origins whose file could not be inserted.
  pub fn errors(&self) -> Vec<Origin> {
    self
      .files
      .iter()
      .filter(|f| matches!(f.status, FileStatus::Error | FileStatus::OutOfBounds))
      .map(|f| f.origin)
      .collect()
  }

  /// Totals over all files.
  pub fn point_stats(&self) -> PointStats {
    let mut total = PointStats::default();
    for file in &self.files {
      total.add(&file.stats);
    }
    total
  }

  /// Files in our range still outstanding.
  pub fn outstanding(&self) -> usize {
    self
      .range()
      .filter(|&o| self.files[o as usize].status == FileStatus::Outstanding)
      .count()
  }

  fn ensure_same_files(&self, other: &Manifest) -> Result<()> {
    let same = self.files.len() == other.files.len()
      && self
        .files
        .iter()
        .zip(&other.files)
        .all(|(a, b)| a.path == b.path);
    if same {
      Ok(())
    } else {
      Err(Error::mismatch("manifest", "file lists differ"))
    }
  }
}

#[cfg(test)]
#[path = "manifest_test.rs"]
mod manifest_test;
