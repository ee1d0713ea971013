//! TOML description of one build.
//!
//! ```toml
//! input = ["/data/tiles", "s3://bucket/extra.xyz"]
//! output = "/data/index"
//! threshold = 0.75
//!
//! [structure]
//! base_depth_end = 7
//! node_capacity = 128
//!
//! [subset]
//! id = 2
//! of = 8
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::builder::{BuildParams, Runtime};
use crate::error::{Error, Result};
use crate::executor::{Executor, Reprojection};
use crate::manifest::Manifest;
use crate::point::Schema;
use crate::storage::{is_remote, local_path, Endpoint, LocalEndpoint};
use crate::structure::Structure;
use crate::subset::Subset;

/// Root configuration of a build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
  /// Source files. Local directories expand to the files they contain.
  pub input: Vec<String>,
  /// Output directory of the index.
  pub output: PathBuf,
  /// Scratch directory for localized remote sources.
  #[serde(default)]
  pub tmp: Option<PathBuf>,
  /// Inferred from file previews when absent.
  #[serde(default)]
  pub bounds: Option<BBox>,
  #[serde(default)]
  pub schema: Schema,
  #[serde(default)]
  pub structure: Structure,
  #[serde(default)]
  pub subset: Option<Subset>,
  #[serde(default)]
  pub reprojection: Option<Reprojection>,
  #[serde(default = "default_trust_headers")]
  pub trust_headers: bool,
  /// Defaults to the available parallelism.
  #[serde(default)]
  pub work_threads: Option<usize>,
  #[serde(default)]
  pub clip_threads: Option<usize>,
  /// Usage fraction at which chunk eviction starts.
  #[serde(default = "default_threshold")]
  pub threshold: f32,
  /// Resident cold chunks that count as full usage.
  #[serde(default = "default_chunk_budget")]
  pub chunk_budget: usize,
}

fn default_trust_headers() -> bool {
  true
}

fn default_threshold() -> f32 {
  0.8
}

fn default_chunk_budget() -> usize {
  4096
}

impl BuildConfig {
  /// Load configuration from a TOML file.
  pub fn load(path: &Path) -> Result<Self> {
    let content = fs::read_to_string(path)?;
    Self::parse(&content)
  }

  pub fn parse(content: &str) -> Result<Self> {
    let config: BuildConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.input.is_empty() {
      return Err(Error::Config("at least one input path is required".into()));
    }
    if !(self.threshold > 0.0 && self.threshold <= 1.0) {
      return Err(Error::Config(format!(
        "threshold must be in (0, 1], got {}",
        self.threshold
      )));
    }
    if self.chunk_budget == 0 {
      return Err(Error::Config("chunk_budget must be positive".into()));
    }
    if self.work_threads == Some(0) || self.clip_threads == Some(0) {
      return Err(Error::Config("thread counts must be positive".into()));
    }
    self.structure.validate()?;
    if let Some(subset) = &self.subset {
      subset.validate(&self.structure)?;
    }
    Ok(())
  }

  /// Source files in manifest order.
  ///
  /// Directories contribute their regular files sorted by name; nested
  /// directories are not searched.
  pub fn manifest(&self) -> Result<Manifest> {
    let mut paths = Vec::new();
    for input in &self.input {
      let local = Path::new(local_path(input));
      if is_remote(input) || !local.is_dir() {
        paths.push(input.clone());
        continue;
      }
      let mut found = Vec::new();
      for entry in fs::read_dir(local)? {
        let path = entry?.path();
        if path.is_file() {
          found.push(path.to_string_lossy().into_owned());
        }
      }
      found.sort();
      tracing::debug!(dir = %local.display(), files = found.len(), "expanded input directory");
      paths.extend(found);
    }
    Ok(Manifest::from_paths(paths))
  }

  pub fn params(&self) -> Result<BuildParams> {
    Ok(BuildParams {
      manifest: self.manifest()?,
      schema: self.schema.clone(),
      bounds: self.bounds,
      structure: self.structure.clone(),
      subset: self.subset,
      reprojection: self.reprojection.clone(),
      trust_headers: self.trust_headers,
    })
  }

  /// Output endpoint plus thread and memory settings.
  pub fn runtime(&self, executor: Arc<dyn Executor>) -> Result<Runtime> {
    let out: Arc<dyn Endpoint> = Arc::new(LocalEndpoint::new(self.output.clone())?);
    let mut runtime = Runtime::new(out).with_executor(executor);
    runtime.tmp = self.tmp.clone();
    if let Some(threads) = self.work_threads {
      runtime.work_threads = threads;
    }
    if let Some(threads) = self.clip_threads {
      runtime.clip_threads = threads;
    }
    runtime.threshold = self.threshold;
    runtime.chunk_budget = self.chunk_budget;
    Ok(runtime)
  }
}
