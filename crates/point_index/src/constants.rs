//! Tree and storage layout constants.
//!
//! # Node addressing
//!
//! ```text
//! depth 0:                     0
//!                    ┌─────┬───┴─┬─────┐
//! depth 1:           1     2     3     4          (2D, factor 4)
//!                  ┌─┴─┐
//! depth 2:         5 ... 8   9 ... 12   ...
//!
//! child(id, dir) = (id << dims) + 1 + dir
//! level_begin(d) = (f^d - 1) / (f - 1)
//! ```
//!
//! Direction bits: bit 0 = upper X half, bit 1 = upper Y half, bit 2 =
//! upper Z half (3D only). Lower halves are half-open `[min, mid)`, upper
//! halves are closed `[mid, max]`.
//!
//! # Storage keys
//!
//! ```text
//! index{postfix}.json   metadata (structure, schema, manifest, hierarchy)
//! base{postfix}         resident tier, one file
//! {chunk id}{postfix}   one file per cold chunk
//! ```

/// Hard ceiling on tree depth.
///
/// Reached only by clustered duplicates when duplicate discarding is off.
pub const MAX_DEPTH: usize = 64;

/// Fewest outstanding origins `take_work` will split.
pub const MIN_SPLIT_ORIGINS: u64 = 2;

/// In-flight file tasks per work thread in the dispatch queue.
pub const QUEUE_DEPTH: usize = 2;

/// Chunks a clipper may hold before it releases its stalest touches.
pub const CLIPPER_HIGH_WATER: usize = 64;

/// Chunks a clipper keeps after releasing stale touches.
pub const CLIPPER_KEEP: usize = 32;

/// Points per buffer handed from the executor to the registry.
pub const BUFFER_POINTS: usize = 4096;

/// Idle point buffers retained by `Pools`.
pub const MAX_IDLE_BUFFERS: usize = 64;

/// Metadata key stem.
pub const META_STEM: &str = "index";

/// Base tier key stem.
pub const BASE_STEM: &str = "base";

/// Leading bytes of every serialized chunk.
pub const CHUNK_MAGIC: [u8; 4] = *b"PIC1";

/// Storage key of the metadata document for a postfix.
pub fn meta_key(postfix: &str) -> String {
  format!("{META_STEM}{postfix}.json")
}

/// Storage key of the base tier for a postfix.
pub fn base_key(postfix: &str) -> String {
  format!("{BASE_STEM}{postfix}")
}

#[cfg(test)]
#[path = "constants_test.rs"]
mod constants_test;
