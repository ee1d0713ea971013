//! Crate-wide error type.
//!
//! Errors fall into two groups. Per-file conditions (an unreadable source,
//! points that cannot be reprojected) are absorbed by the builder and
//! reported through the manifest and the error list. Everything else aborts
//! the operation that hit it and is returned to the caller.

use thiserror::Error;

/// Errors produced while building, saving or merging an index.
#[derive(Debug, Error)]
pub enum Error {
  /// Storage read or write failure.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// Metadata could not be encoded or decoded.
  #[error("metadata error: {0}")]
  Json(#[from] serde_json::Error),

  /// A TOML build configuration could not be parsed.
  #[error("config parse error: {0}")]
  Toml(#[from] toml::de::Error),

  /// Invalid structure, subset or runtime configuration.
  #[error("invalid configuration: {0}")]
  Config(String),

  /// Two builds that must agree (continuation, merge, unsplit) do not.
  #[error("{what} mismatch: {detail}")]
  Mismatch {
    /// Which property differs.
    what: &'static str,
    /// Human readable description of the difference.
    detail: String,
  },

  /// A merge would combine registries that cover the same nodes.
  #[error("overlapping merge: {0}")]
  Overlap(String),

  /// Degenerate point clustering pushed a node past the depth ceiling.
  #[error("node depth {depth} exceeds the tree depth ceiling")]
  DepthExceeded {
    /// Depth the insertion tried to reach.
    depth: usize,
  },

  /// A storage key that must exist is missing.
  #[error("missing storage key: {0}")]
  NotFound(String),

  /// A chunk payload could not be decoded.
  #[error("corrupt chunk {key}: {reason}")]
  Corrupt {
    /// Storage key of the chunk.
    key: String,
    /// What was wrong with it.
    reason: String,
  },

  /// Insertion was requested after the build was saved.
  #[error("build has been saved; no further insertion is allowed")]
  Finalized,

  /// The point executor failed to read a source file.
  #[error("executor error: {0}")]
  Executor(String),

  /// Points could not be transformed into the output SRS.
  #[error("reprojection error: {0}")]
  Reprojection(String),

  /// A worker thread failed or its pool could not be built.
  #[error("thread pool error: {0}")]
  Pool(String),
}

impl Error {
  /// True for conditions that only invalidate a single source file.
  ///
  /// The builder records these in the manifest and keeps going; anything
  /// else stops `go()`.
  pub fn is_per_file(&self) -> bool {
    matches!(self, Self::Executor(_) | Self::Reprojection(_))
  }

  pub(crate) fn mismatch(what: &'static str, detail: impl Into<String>) -> Self {
    Self::Mismatch {
      what,
      detail: detail.into(),
    }
  }

  pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> Self {
    Self::Corrupt {
      key: key.to_string(),
      reason: reason.into(),
    }
  }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
