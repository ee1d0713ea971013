//! Assembles the pieces of a distributed build into one index.
//!
//! Pieces are found through their metadata keys. Each subset is first
//! reassembled from its split chain, then the subsets are merged into the
//! first one.

use std::sync::Arc;

use crate::builder::{postfix, Builder};
use crate::constants::meta_key;
use crate::error::{Error, Result};
use crate::point::Origin;
use crate::storage::Endpoint;

/// Merge every saved piece in `out` and save the whole build.
#[tracing::instrument(skip_all)]
pub fn merge_all(out: Arc<dyn Endpoint>) -> Result<Builder> {
  let primary = if out.exists(&meta_key(""))? {
    assemble(&out, None)?
  } else {
    assemble(&out, Some(0))?
  };

  if let Some(subset) = primary.subset() {
    for id in 1..subset.of {
      let other = assemble(&out, Some(id))?;
      primary.merge(&other)?;
    }
  }

  primary.make_whole();
  primary.save()?;
  tracing::info!(
    points = primary.registry().point_count(),
    errors = primary.errors().len(),
    "merged build"
  );
  Ok(primary)
}

/// Open the piece starting at origin 0 and take back every split that
/// follows it.
fn assemble(out: &Arc<dyn Endpoint>, subset_id: Option<u64>) -> Result<Builder> {
  let builder = awaken(out, subset_id, 0)?;
  loop {
    let manifest = builder.manifest();
    let end = manifest.range().end;
    if manifest.split().is_none() || end >= manifest.len() {
      break;
    }
    let piece = awaken(out, subset_id, end)?;
    builder.unsplit(&piece)?;
    tracing::debug!(subset = ?subset_id, begin = end, "took back split");
  }
  Ok(builder)
}

fn awaken(out: &Arc<dyn Endpoint>, subset_id: Option<u64>, split_begin: Origin) -> Result<Builder> {
  Builder::awaken(Arc::clone(out), subset_id, split_begin)?
    .ok_or_else(|| Error::NotFound(meta_key(&postfix(split_begin, subset_id))))
}
