//! The spatial tree: node storage tiers and the registry over them.
//!
//! - `cell` / `chunk`: points at a node, nodes grouped into chunks
//! - `base` / `cold`: resident and evictable tiers
//! - `climber` / `clipper`: per-worker traversal and touch tracking
//! - `registry`: insertion, lookup, eviction and persistence

mod base;
mod cell;
mod chunk;
mod climber;
mod clipper;
mod cold;
mod hierarchy;
mod registry;

pub use base::BaseChunk;
pub use cell::Cell;
pub use chunk::{Chunk, Node, NodeRules, Placement};
pub use climber::Climber;
pub use clipper::{ChunkLedger, Clipper};
pub use cold::{ChunkStorage, Cold};
pub use hierarchy::Hierarchy;
pub use registry::{Registry, RegistryOptions};
