//! point_index - out-of-core octree indexing for large point clouds
//!
//! Source files listed in a [`Manifest`] are streamed through an
//! [`Executor`] and inserted into a [`Registry`]: a node tree whose upper
//! depths stay resident and whose deeper depths live in chunks that are
//! paged to an [`Endpoint`] under memory pressure.
//!
//! # Features
//!
//! - **Parallel insertion**: one task per file on a work pool, chunk
//!   eviction on a separate clip pool
//! - **Resumable builds**: `save` writes metadata that `Builder::resume`
//!   reopens
//! - **Distributed builds**: manifest splits (`take_work` / `unsplit`) and
//!   spatial subsets (`merge`), assembled by [`merger::merge_all`]
//!
//! # Example
//!
//! ```ignore
//! use point_index::{Builder, BuildParams, Manifest, Runtime, XyzExecutor};
//!
//! let runtime = Runtime::new(out).with_executor(Arc::new(XyzExecutor));
//! let params = BuildParams::new(Manifest::from_paths(["a.xyz", "b.xyz"]));
//! let builder = Builder::create(runtime, params)?;
//! builder.go(0)?;
//! builder.save()?;
//! ```

pub mod bbox;
pub mod constants;
pub mod error;
pub mod id;
pub mod point;
pub mod structure;
pub mod subset;

pub use bbox::BBox;
pub use error::{Error, Result};
pub use id::Id;
pub use point::{DimType, Dimension, Origin, PointBuffer, PointRef, Schema};
pub use structure::{ChunkKey, ChunkPolicy, Structure};
pub use subset::Subset;

// Source files and their per-file results
pub mod manifest;
pub use manifest::{FileInfo, FileStatus, Manifest, PointStats, Split};

// Byte storage
pub mod storage;
pub use storage::{Endpoint, LocalEndpoint, MemoryEndpoint};

// Point readers
pub mod executor;
pub use executor::{Executor, Preview, Reprojection, XyzExecutor};

// Threads, buffers and memory pressure
pub mod pools;
pub mod threading;
pub mod usage;
pub use pools::{Arena, Pools};
pub use threading::Pool;
pub use usage::Usage;

// Node tree and chunk tiers
pub mod tree;
pub use tree::{Cell, Hierarchy, Registry};

// Build orchestration
pub mod builder;
pub mod config;
pub mod merger;
pub use builder::{BuildParams, BuildState, Builder, Runtime};
pub use config::BuildConfig;

#[cfg(test)]
mod test_utils;
