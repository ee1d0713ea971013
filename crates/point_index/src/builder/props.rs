//! Build metadata document, stored as `index{postfix}.json`.

use serde::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::error::Result;
use crate::executor::Reprojection;
use crate::manifest::Manifest;
use crate::point::Schema;
use crate::storage::Endpoint;
use crate::structure::Structure;
use crate::subset::Subset;
use crate::tree::Hierarchy;

/// Lifecycle of a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
  /// Created, nothing inserted yet.
  #[default]
  Fresh,
  /// `go` is running.
  Running,
  /// `go` returned; more insertion is allowed.
  Stopped,
  /// Saved; this builder accepts no more insertion.
  Saved,
  /// Holds the merged result of other subsets.
  Merged,
  /// Complete build assembled from every split and subset.
  Whole,
}

impl BuildState {
  /// True if `go` may run.
  pub fn accepts_insertion(self) -> bool {
    matches!(self, Self::Fresh | Self::Stopped)
  }
}

/// Everything needed to reopen a build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Props {
  pub state: BuildState,
  pub bounds: BBox,
  pub schema: Schema,
  pub structure: Structure,
  pub manifest: Manifest,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subset: Option<Subset>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reprojection: Option<Reprojection>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub srs: Option<String>,
  #[serde(default)]
  pub trust_headers: bool,
  #[serde(default)]
  pub errors: Vec<String>,
  pub hierarchy: Hierarchy,
}

impl Props {
  /// Read `key`, or `None` if no build was saved there.
  pub fn load(endpoint: &dyn Endpoint, key: &str) -> Result<Option<Self>> {
    match endpoint.get(key)? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  pub fn save(&self, endpoint: &dyn Endpoint, key: &str) -> Result<()> {
    endpoint.put(key, &serde_json::to_vec_pretty(self)?)
  }
}
