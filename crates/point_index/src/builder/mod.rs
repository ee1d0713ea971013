//! Builder - drives a build from manifest to saved index.
//!
//! # Lifecycle
//!
//! ```text
//! create / resume ──► go ──► go ... ──► save
//!                      │                  │
//!                 take_work          unsplit / merge ──► make_whole ──► save
//! ```
//!
//! `go` dispatches files in origin order from a single thread onto the
//! work pool, keeping at most `QUEUE_DEPTH` tasks per work thread in
//! flight. Each task owns a clipper for its file, so a file's cold chunks
//! become evictable when the file is done.
//!
//! Postfixes keep independent pieces of a distributed build apart in one
//! output location:
//!
//! ```text
//! -{split begin}   when the piece starts past origin 0
//! -{subset id}     when a subset is configured
//! ```
//!
//! Cold chunks carry only the split part; subsets never share a chunk.

mod insert;
mod props;

pub use insert::FileOutcome;
pub use props::{BuildState, Props};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use web_time::Instant;

use crate::bbox::BBox;
use crate::constants::{meta_key, QUEUE_DEPTH};
use crate::error::{Error, Result};
use crate::executor::{infer_bounds, Executor, Reprojection};
use crate::manifest::{FileStatus, Manifest, Split};
use crate::point::{Origin, Schema};
use crate::pools::Pools;
use crate::storage::{is_remote, local_path, Endpoint, LocalEndpoint};
use crate::structure::Structure;
use crate::subset::Subset;
use crate::threading::{lock, Pool};
use crate::tree::{Registry, RegistryOptions};
use crate::usage::Usage;
use insert::Inserter;

/// Storage key suffix of a build piece.
pub fn postfix(split_begin: Origin, subset_id: Option<u64>) -> String {
  let mut postfix = cold_postfix(split_begin);
  if let Some(id) = subset_id {
    postfix.push_str(&format!("-{id}"));
  }
  postfix
}

fn cold_postfix(split_begin: Origin) -> String {
  if split_begin == 0 {
    String::new()
  } else {
    format!("-{split_begin}")
  }
}

/// Process resources of a build. Nothing here is persisted.
#[derive(Clone)]
pub struct Runtime {
  /// Where the index is written.
  pub out: Arc<dyn Endpoint>,
  /// Scratch directory for localized remote sources.
  pub tmp: Option<PathBuf>,
  /// Store serving source paths with a URL scheme.
  pub remote: Option<Arc<dyn Endpoint>>,
  pub executor: Option<Arc<dyn Executor>>,
  pub work_threads: usize,
  pub clip_threads: usize,
  /// Usage at which tentative clips evict.
  pub threshold: f32,
  /// Resident cold chunks that count as 100% usage.
  pub chunk_budget: usize,
}

impl Runtime {
  pub fn new(out: Arc<dyn Endpoint>) -> Self {
    let threads = std::thread::available_parallelism()
      .map(|n| n.get())
      .unwrap_or(4);
    Self {
      out,
      tmp: None,
      remote: None,
      executor: None,
      work_threads: threads,
      clip_threads: (threads / 4).max(1),
      threshold: 0.8,
      chunk_budget: 4096,
    }
  }

  pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }
}

/// What a new build indexes and how.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildParams {
  pub manifest: Manifest,
  pub schema: Schema,
  /// Build bounds. Inferred from file previews when absent.
  pub bounds: Option<BBox>,
  pub structure: Structure,
  pub subset: Option<Subset>,
  pub reprojection: Option<Reprojection>,
  /// Use previewed file bounds and counts to skip files before reading
  /// them.
  pub trust_headers: bool,
}

impl BuildParams {
  pub fn new(manifest: Manifest) -> Self {
    Self {
      manifest,
      schema: Schema::default(),
      bounds: None,
      structure: Structure::default(),
      subset: None,
      reprojection: None,
      trust_headers: true,
    }
  }
}

/// State guarded by the builder mutex.
struct Inner {
  state: BuildState,
  manifest: Manifest,
  subset: Option<Subset>,
  srs: Option<String>,
  errors: Vec<String>,
  /// Next origin to dispatch.
  cursor: Origin,
}

pub struct Builder {
  runtime: Runtime,
  bounds: BBox,
  schema: Schema,
  structure: Structure,
  reprojection: Option<Reprojection>,
  trust_headers: bool,
  registry: Arc<Registry>,
  pools: Arc<Pools>,
  usage: Arc<Usage>,
  inner: Mutex<Inner>,
  stop: AtomicBool,
}

impl Builder {
  // ===========================================================================
  // Construction
  // ===========================================================================

  /// Start a new build.
  pub fn create(runtime: Runtime, params: BuildParams) -> Result<Self> {
    params.structure.validate()?;
    if let Some(subset) = &params.subset {
      subset.validate(&params.structure)?;
    }
    let bounds = match params.bounds {
      Some(bounds) => bounds,
      None => Self::infer_bounds(&runtime, &params.manifest)?,
    };
    if bounds.is_empty() {
      return Err(Error::Config("build bounds are empty".into()));
    }

    let split_begin = params.manifest.range().start;
    let subset_id = params.subset.map(|s| s.id);
    let usage = Arc::new(Usage::default());
    let registry = Registry::create(Self::registry_options(
      &runtime,
      bounds,
      &params.structure,
      &params.schema,
      split_begin,
      subset_id,
      &usage,
    ))?;

    tracing::info!(
      files = params.manifest.len(),
      postfix = %postfix(split_begin, subset_id),
      "created build"
    );
    let srs = params.reprojection.as_ref().map(|r| r.out_srs.clone());
    Ok(Self {
      bounds,
      pools: Arc::new(Pools::new(params.schema.record_size())),
      schema: params.schema,
      structure: params.structure,
      reprojection: params.reprojection,
      trust_headers: params.trust_headers,
      registry: Arc::new(registry),
      usage,
      inner: Mutex::new(Inner {
        state: BuildState::Fresh,
        cursor: split_begin,
        manifest: params.manifest,
        subset: params.subset,
        srs,
        errors: Vec::new(),
      }),
      stop: AtomicBool::new(false),
      runtime,
    })
  }

  /// Reopen a saved build to continue inserting.
  pub fn resume(runtime: Runtime, subset_id: Option<u64>, split_begin: Origin) -> Result<Self> {
    let key = meta_key(&postfix(split_begin, subset_id));
    let props = Props::load(runtime.out.as_ref(), &key)?.ok_or_else(|| Error::NotFound(key.clone()))?;
    let builder = Self::from_props(runtime, props)?;
    tracing::info!(
      meta = %key,
      outstanding = builder.manifest().outstanding(),
      "resumed build"
    );
    Ok(builder)
  }

  /// Open a saved build piece for merging. `None` if nothing was saved
  /// under that postfix.
  pub fn awaken(out: Arc<dyn Endpoint>, subset_id: Option<u64>, split_begin: Origin) -> Result<Option<Self>> {
    let key = meta_key(&postfix(split_begin, subset_id));
    let Some(props) = Props::load(out.as_ref(), &key)? else {
      return Ok(None);
    };
    tracing::debug!(meta = %key, "awakened build");
    Self::from_props(Runtime::new(out), props).map(Some)
  }

  fn from_props(runtime: Runtime, props: Props) -> Result<Self> {
    let split_begin = props.manifest.range().start;
    let subset_id = props.subset.map(|s| s.id);
    let usage = Arc::new(Usage::default());
    let registry = Registry::open(
      Self::registry_options(
        &runtime,
        props.bounds,
        &props.structure,
        &props.schema,
        split_begin,
        subset_id,
        &usage,
      ),
      &props.hierarchy,
    )?;
    let state = match props.state {
      BuildState::Running | BuildState::Saved => BuildState::Stopped,
      state => state,
    };
    Ok(Self {
      bounds: props.bounds,
      pools: Arc::new(Pools::new(props.schema.record_size())),
      schema: props.schema,
      structure: props.structure,
      reprojection: props.reprojection,
      trust_headers: props.trust_headers,
      registry: Arc::new(registry),
      usage,
      inner: Mutex::new(Inner {
        state,
        cursor: split_begin,
        manifest: props.manifest,
        subset: props.subset,
        srs: props.srs,
        errors: props.errors,
      }),
      stop: AtomicBool::new(false),
      runtime,
    })
  }

  fn registry_options(
    runtime: &Runtime,
    bounds: BBox,
    structure: &Structure,
    schema: &Schema,
    split_begin: Origin,
    subset_id: Option<u64>,
    usage: &Arc<Usage>,
  ) -> RegistryOptions {
    RegistryOptions {
      out: Arc::clone(&runtime.out),
      root: bounds,
      structure: structure.clone(),
      record_size: schema.record_size(),
      base_postfix: postfix(split_begin, subset_id),
      cold_postfix: cold_postfix(split_begin),
      clip_threads: runtime.clip_threads,
      usage: Arc::clone(usage),
      threshold: runtime.threshold,
      chunk_budget: runtime.chunk_budget,
    }
  }

  fn infer_bounds(runtime: &Runtime, manifest: &Manifest) -> Result<BBox> {
    let Some(executor) = &runtime.executor else {
      return Err(Error::Config("bounds are required when no executor is configured".into()));
    };
    let paths = manifest
      .files()
      .iter()
      .map(|f| f.path.as_str())
      .filter(|path| !is_remote(path))
      .map(local_path);
    let bounds = infer_bounds(executor.as_ref(), paths)?;
    tracing::info!(min = ?bounds.min, max = ?bounds.max, "inferred build bounds");
    Ok(bounds)
  }

  // ===========================================================================
  // Insertion
  // ===========================================================================

  /// Insert outstanding files until none remain, `max_file_insertions`
  /// files have been processed (0 = no limit) or `stop` is called.
  /// Returns the number of files processed.
  #[tracing::instrument(skip_all, fields(postfix = %self.postfix()))]
  pub fn go(&self, max_file_insertions: u64) -> Result<u64> {
    let executor = self
      .runtime
      .executor
      .clone()
      .ok_or_else(|| Error::Config("no executor configured".into()))?;
    if !self.state().accepts_insertion() {
      return Err(Error::Finalized);
    }

    let start = Instant::now();
    let inserter = Arc::new(Inserter {
      registry: Arc::clone(&self.registry),
      executor: Arc::clone(&executor),
      pools: Arc::clone(&self.pools),
      schema: self.schema.clone(),
      reprojection: self.reprojection.clone(),
      bounds: self.bounds,
      subset: self.subset(),
      tmp: self.scratch()?,
      remote: self.runtime.remote.clone(),
    });
    let pool: Pool<Result<FileOutcome>> = Pool::new("work", self.runtime.work_threads)?;
    {
      let mut inner = lock(&self.inner);
      if !inner.state.accepts_insertion() {
        return Err(Error::Finalized);
      }
      inner.state = BuildState::Running;
    }
    let queue = pool.num_threads() * QUEUE_DEPTH;
    let limit = if max_file_insertions == 0 {
      u64::MAX
    } else {
      max_file_insertions
    };
    tracing::info!(threads = pool.num_threads(), limit = max_file_insertions, "starting insertion");

    let mut processed = 0;
    let mut failure = None;
    loop {
      while failure.is_none()
        && processed < limit
        && pool.outstanding() < queue
        && !self.stop.load(Ordering::SeqCst)
      {
        let Some((origin, path)) = self.next_file() else {
          break;
        };
        processed += 1;
        match self.check(executor.as_ref(), origin, &path) {
          Ok(Some(outcome)) => self.record(outcome),
          Ok(None) => {
            let inserter = Arc::clone(&inserter);
            pool.spawn(move || inserter.insert(origin, &path));
          }
          Err(e) => failure = Some(e),
        }
      }

      let Some(result) = pool.next() else {
        break;
      };
      match result.and_then(|outcome| outcome) {
        Ok(outcome) => self.record(outcome),
        Err(e) => {
          tracing::warn!(error = %e, "file task failed; draining in-flight work");
          failure.get_or_insert(e);
        }
      }
    }

    self.stop.store(false, Ordering::SeqCst);
    let flushed = self.registry.flush_clips();
    lock(&self.inner).state = BuildState::Stopped;
    if let Some(e) = failure {
      return Err(e);
    }
    flushed?;

    tracing::info!(
      files = processed,
      points = self.registry.point_count(),
      outstanding = self.manifest().outstanding(),
      elapsed_ms = start.elapsed().as_millis() as u64,
      "insertion pass finished"
    );
    Ok(processed)
  }

  fn scratch(&self) -> Result<Option<LocalEndpoint>> {
    self
      .runtime
      .tmp
      .as_ref()
      .map(|dir| LocalEndpoint::new(dir.clone()))
      .transpose()
  }

  /// Claim the next outstanding origin in our range.
  fn next_file(&self) -> Option<(Origin, String)> {
    let mut inner = lock(&self.inner);
    let range = inner.manifest.range();
    let mut origin = inner.cursor.max(range.start);
    while origin < range.end {
      let (status, path) = match inner.manifest.get(origin) {
        Some(file) => (file.status, file.path.clone()),
        None => break,
      };
      origin += 1;
      if status == FileStatus::Outstanding {
        inner.cursor = origin;
        return Some((origin - 1, path));
      }
    }
    inner.cursor = origin;
    None
  }

  fn check(&self, executor: &dyn Executor, origin: Origin, path: &str) -> Result<Option<FileOutcome>> {
    if let Some(outcome) = self.check_info(executor, origin, path)? {
      return Ok(Some(outcome));
    }
    Ok(self.check_bounds(origin, path))
  }

  /// Fill in missing file info from a preview and skip empty files.
  fn check_info(&self, executor: &dyn Executor, origin: Origin, path: &str) -> Result<Option<FileOutcome>> {
    let (bounds, num_points) = match lock(&self.inner).manifest.get(origin) {
      Some(file) => (file.bounds, file.num_points),
      None => return Ok(None),
    };

    if self.trust_headers && (bounds.is_none() || num_points.is_none()) && !is_remote(path) {
      match executor.preview(local_path(path)) {
        Ok(preview) => {
          let mut inner = lock(&self.inner);
          match preview {
            Some(preview) => {
              inner
                .manifest
                .set_info(origin, Some(preview.bounds), Some(preview.num_points));
              if inner.srs.is_none() && self.reprojection.is_none() {
                if let Some(srs) = preview.srs {
                  tracing::info!(srs = %srs, path, "build SRS taken from file");
                  inner.srs = Some(srs);
                }
              }
            }
            None => inner.manifest.set_info(origin, None, Some(0)),
          }
        }
        Err(e) if e.is_per_file() => {
          tracing::warn!(origin, path, error = %e, "preview failed");
          return Ok(Some(FileOutcome::skipped(
            origin,
            FileStatus::Error,
            Some(e.to_string()),
          )));
        }
        Err(e) => return Err(e),
      }
    }

    let num_points = lock(&self.inner).manifest.get(origin).and_then(|f| f.num_points);
    if num_points == Some(0) {
      tracing::debug!(origin, path, "skipping empty file");
      return Ok(Some(FileOutcome::skipped(origin, FileStatus::Omitted, None)));
    }
    Ok(None)
  }

  /// Skip files whose known bounds miss the build or our subset.
  fn check_bounds(&self, origin: Origin, path: &str) -> Option<FileOutcome> {
    let (bounds, subset) = {
      let inner = lock(&self.inner);
      (inner.manifest.get(origin)?.bounds?, inner.subset)
    };
    if !bounds.overlaps(&self.bounds) {
      tracing::warn!(origin, path, "file lies outside the build bounds");
      return Some(FileOutcome::skipped(
        origin,
        FileStatus::OutOfBounds,
        Some(format!("{path}: bounds lie outside the build bounds")),
      ));
    }
    if let Some(subset) = subset {
      let region = subset.bbox(&self.bounds, self.structure.dimensions);
      if !bounds.overlaps(&region) {
        tracing::debug!(origin, path, subset = subset.id, "file misses our subset");
        return Some(FileOutcome::skipped(origin, FileStatus::Omitted, None));
      }
    }
    None
  }

  fn record(&self, outcome: FileOutcome) {
    {
      let mut inner = lock(&self.inner);
      inner.manifest.set(outcome.origin, outcome.status, outcome.stats);
      if let Some(error) = outcome.error {
        inner.errors.push(error);
      }
    }
    if self.registry.under_pressure() {
      self.registry.sweep();
    }
  }

  /// Ask `go` to return once in-flight files finish.
  pub fn stop(&self) {
    tracing::info!("stop requested");
    self.stop.store(true, Ordering::SeqCst);
  }

  // ===========================================================================
  // Persistence
  // ===========================================================================

  /// Write the registry and metadata. The builder accepts no more
  /// insertion afterwards; saving again rewrites the same keys.
  #[tracing::instrument(skip_all, fields(postfix = %self.postfix()))]
  pub fn save(&self) -> Result<()> {
    let mut inner = lock(&self.inner);
    if inner.state == BuildState::Running {
      return Err(Error::Config("cannot save while insertion is running".into()));
    }
    let postfix = postfix(inner.manifest.range().start, inner.subset.map(|s| s.id));
    self.registry.set_base_postfix(postfix.clone());
    self.registry.save()?;
    if inner.state.accepts_insertion() {
      inner.state = BuildState::Saved;
    }

    let props = self.props(&inner);
    let key = meta_key(&postfix);
    props.save(self.runtime.out.as_ref(), &key)?;
    tracing::info!(
      meta = %key,
      points = props.hierarchy.point_count(),
      nodes = props.hierarchy.len(),
      "saved build"
    );
    Ok(())
  }

  fn props(&self, inner: &Inner) -> Props {
    Props {
      state: inner.state,
      bounds: self.bounds,
      schema: self.schema.clone(),
      structure: self.structure.clone(),
      manifest: inner.manifest.clone(),
      subset: inner.subset,
      reprojection: self.reprojection.clone(),
      srs: inner.srs.clone(),
      trust_headers: self.trust_headers,
      errors: inner.errors.clone(),
      hierarchy: self.registry.hierarchy(),
    }
  }

  // ===========================================================================
  // Distribution
  // ===========================================================================

  /// Hand the upper half of our outstanding origins to another build.
  /// `None` if too few remain to be worth splitting, or if this build no
  /// longer accepts insertion.
  pub fn take_work(&self) -> Option<Split> {
    let mut inner = lock(&self.inner);
    if !inner.state.accepts_insertion() && inner.state != BuildState::Running {
      return None;
    }
    let cursor = inner.cursor;
    let split = inner.manifest.split_at(cursor)?;
    tracing::info!(begin = split.begin, end = split.end, "handing off work");
    Some(split)
  }

  /// Parameters for the build that takes `split`.
  pub fn work_params(&self, split: Split) -> BuildParams {
    let inner = lock(&self.inner);
    BuildParams {
      manifest: inner.manifest.with_split(split),
      schema: self.schema.clone(),
      bounds: Some(self.bounds),
      structure: self.structure.clone(),
      subset: inner.subset,
      reprojection: self.reprojection.clone(),
      trust_headers: self.trust_headers,
    }
  }

  fn ensure_compatible(&self, other: &Builder) -> Result<()> {
    if std::ptr::eq(self, other) {
      return Err(Error::Overlap("a build cannot be combined with itself".into()));
    }
    self.structure.ensure_same(&other.structure)?;
    if self.schema != other.schema {
      return Err(Error::mismatch(
        "schema",
        format!("{:?} vs {:?}", self.schema, other.schema),
      ));
    }
    if self.bounds != other.bounds {
      return Err(Error::mismatch(
        "bounds",
        format!("{:?} vs {:?}", self.bounds, other.bounds),
      ));
    }
    Ok(())
  }

  /// Take back the work of a build created from our `take_work`.
  #[tracing::instrument(skip_all)]
  pub fn unsplit(&self, other: &Builder) -> Result<()> {
    self.ensure_compatible(other)?;
    let (theirs, their_errors, their_subset) = {
      let inner = lock(&other.inner);
      (inner.manifest.clone(), inner.errors.clone(), inner.subset)
    };
    let mut manifest = {
      let inner = lock(&self.inner);
      if inner.subset != their_subset {
        return Err(Error::mismatch(
          "subset",
          format!("{:?} vs {their_subset:?}", inner.subset),
        ));
      }
      inner.manifest.clone()
    };
    manifest.unsplit(&theirs)?;

    let points = self.registry.absorb(&other.registry)?;
    let mut inner = lock(&self.inner);
    inner.manifest = manifest;
    inner.errors.extend(their_errors);
    tracing::info!(points, range = ?inner.manifest.range(), "unsplit");
    Ok(())
  }

  /// Merge the build of another spatial subset.
  #[tracing::instrument(skip_all)]
  pub fn merge(&self, other: &Builder) -> Result<()> {
    self.ensure_compatible(other)?;
    let (theirs, their_errors, their_subset, their_srs) = {
      let inner = lock(&other.inner);
      (
        inner.manifest.clone(),
        inner.errors.clone(),
        inner.subset,
        inner.srs.clone(),
      )
    };
    let mut manifest = {
      let inner = lock(&self.inner);
      match (inner.subset, their_subset) {
        (Some(ours), Some(theirs)) if ours.of == theirs.of && ours.id != theirs.id => {}
        (into, from) => {
          return Err(Error::mismatch(
            "subset",
            format!("cannot merge {from:?} into {into:?}"),
          ));
        }
      }
      inner.manifest.clone()
    };
    manifest.merge(&theirs)?;

    self.registry.merge(&other.registry)?;
    let mut inner = lock(&self.inner);
    inner.manifest = manifest;
    inner.errors.extend(their_errors);
    if inner.srs.is_none() {
      inner.srs = their_srs;
    }
    inner.state = BuildState::Merged;
    tracing::info!(subset = ?their_subset, "merged subset");
    Ok(())
  }

  /// Mark this build as the complete result of every split and subset.
  pub fn make_whole(&self) {
    let mut inner = lock(&self.inner);
    inner.subset = None;
    inner.state = BuildState::Whole;
    let postfix = postfix(inner.manifest.range().start, None);
    self.registry.set_base_postfix(postfix);
    tracing::info!(points = self.registry.point_count(), "build is whole");
  }

  // ===========================================================================
  // Accessors
  // ===========================================================================

  /// Per-file error messages. Read between `go` calls.
  pub fn errors(&self) -> Vec<String> {
    lock(&self.inner).errors.clone()
  }

  /// Current memory-pressure fraction.
  pub fn usage(&self) -> f32 {
    self.usage.get()
  }

  pub fn set_usage(&self, usage: f32) {
    self.usage.set(usage);
  }

  pub fn postfix(&self) -> String {
    let inner = lock(&self.inner);
    postfix(inner.manifest.range().start, inner.subset.map(|s| s.id))
  }

  pub fn manifest(&self) -> Manifest {
    lock(&self.inner).manifest.clone()
  }

  pub fn state(&self) -> BuildState {
    lock(&self.inner).state
  }

  pub fn subset(&self) -> Option<Subset> {
    lock(&self.inner).subset
  }

  pub fn srs(&self) -> Option<String> {
    lock(&self.inner).srs.clone()
  }

  pub fn bounds(&self) -> &BBox {
    &self.bounds
  }

  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  pub fn structure(&self) -> &Structure {
    &self.structure
  }

  pub fn reprojection(&self) -> Option<&Reprojection> {
    self.reprojection.as_ref()
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  pub fn out(&self) -> &Arc<dyn Endpoint> {
    &self.runtime.out
  }
}
