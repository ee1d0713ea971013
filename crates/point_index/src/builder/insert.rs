//! Insertion of one source file.
//!
//! Runs on a work thread. Everything a file task needs is shared through
//! one `Inserter`, so tasks hold no reference to the builder itself.

use std::sync::Arc;

use crate::bbox::BBox;
use crate::error::{Error, Result};
use crate::executor::{Executor, Reprojection};
use crate::manifest::{FileStatus, PointStats};
use crate::point::{Origin, PointBuffer, PointRef, Schema};
use crate::pools::Pools;
use crate::storage::{is_remote, local_path, remote_key, Endpoint, LocalEndpoint};
use crate::subset::Subset;
use crate::tree::Registry;

/// Result of one file task.
#[derive(Clone, Debug, PartialEq)]
pub struct FileOutcome {
  pub origin: Origin,
  pub status: FileStatus,
  pub stats: PointStats,
  /// Set for per-file failures.
  pub error: Option<String>,
}

impl FileOutcome {
  pub fn skipped(origin: Origin, status: FileStatus, error: Option<String>) -> Self {
    Self {
      origin,
      status,
      stats: PointStats::default(),
      error,
    }
  }
}

pub(crate) struct Inserter {
  pub registry: Arc<Registry>,
  pub executor: Arc<dyn Executor>,
  pub pools: Arc<Pools>,
  pub schema: Schema,
  pub reprojection: Option<Reprojection>,
  pub bounds: BBox,
  pub subset: Option<Subset>,
  pub tmp: Option<LocalEndpoint>,
  pub remote: Option<Arc<dyn Endpoint>>,
}

/// A source file made readable by the executor.
struct Localized {
  path: String,
  /// Scratch key to delete once the file is done.
  scratch: Option<String>,
}

impl Inserter {
  /// Insert every point of `path`. Per-file failures come back as an
  /// outcome with `FileStatus::Error`; anything else is returned as `Err`.
  pub fn insert(&self, origin: Origin, path: &str) -> Result<FileOutcome> {
    let localized = match self.localize(origin, path) {
      Ok(localized) => localized,
      Err(e) if e.is_per_file() => {
        return Ok(FileOutcome::skipped(origin, FileStatus::Error, Some(e.to_string())));
      }
      Err(e) => return Err(e),
    };

    let result = self.stream(origin, &localized.path);

    if let (Some(tmp), Some(key)) = (&self.tmp, &localized.scratch) {
      if let Err(e) = tmp.remove(key) {
        tracing::warn!(path, error = %e, "failed to remove localized copy");
      }
    }

    match result {
      Ok(stats) => {
        let status = if stats.inserts > 0 || stats.duplicates > 0 {
          FileStatus::Inserted
        } else if stats.out_of_bounds > 0 {
          FileStatus::OutOfBounds
        } else {
          FileStatus::Omitted
        };
        let error = (status == FileStatus::OutOfBounds).then(|| format!("{path}: every point is outside the build bounds"));
        tracing::debug!(
          origin,
          path,
          inserts = stats.inserts,
          duplicates = stats.duplicates,
          out_of_bounds = stats.out_of_bounds,
          "inserted file"
        );
        Ok(FileOutcome {
          origin,
          status,
          stats,
          error,
        })
      }
      Err(e) if e.is_per_file() => {
        tracing::warn!(origin, path, error = %e, "file failed");
        Ok(FileOutcome::skipped(origin, FileStatus::Error, Some(e.to_string())))
      }
      Err(e) => Err(e),
    }
  }

  fn stream(&self, origin: Origin, path: &str) -> Result<PointStats> {
    let mut stats = PointStats::default();
    let mut arena = self.pools.arena();
    let mut climber = self.registry.climber();
    let mut clipper = self.registry.clipper(origin as usize);
    let root = *self.registry.root();
    let dims = self.registry.structure().dimensions;

    self.executor.run(
      path,
      &self.schema,
      self.reprojection.as_ref(),
      &mut arena,
      &mut |buffer: &PointBuffer| -> Result<()> {
        for (point, data) in buffer.iter() {
          if !self.bounds.contains(point) {
            stats.out_of_bounds += 1;
            continue;
          }
          if let Some(subset) = &self.subset {
            if !subset.owns(&root, dims, point) {
              continue;
            }
          }
          let point = PointRef::new(point, origin, data);
          if self.registry.add_point(&mut climber, &mut clipper, point)? {
            stats.inserts += 1;
          } else {
            stats.duplicates += 1;
          }
        }
        Ok(())
      },
    )?;

    clipper.release()?;
    Ok(stats)
  }

  /// Fetch remote sources into the scratch directory.
  fn localize(&self, origin: Origin, path: &str) -> Result<Localized> {
    if !is_remote(path) {
      return Ok(Localized {
        path: local_path(path).to_string(),
        scratch: None,
      });
    }
    let (Some(remote), Some(tmp)) = (&self.remote, &self.tmp) else {
      return Err(Error::Executor(format!(
        "{path}: remote sources need a remote endpoint and a scratch directory"
      )));
    };
    let bytes = remote
      .get_required(remote_key(path))
      .map_err(|e| Error::Executor(format!("{path}: {e}")))?;
    let name = remote_key(path).rsplit('/').next().unwrap_or("source");
    let key = format!("{origin}-{name}");
    tmp.put(&key, &bytes)?;
    tracing::debug!(path, scratch = %tmp.path(&key).display(), "localized remote file");
    Ok(Localized {
      path: tmp.path(&key).to_string_lossy().into_owned(),
      scratch: Some(key),
    })
  }
}
