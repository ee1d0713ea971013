//! Hierarchy - per-node point counts.
//!
//! Every stored node appears once: leaves with their point count, branches
//! with 0. This is enough to rebuild which cold chunks exist without
//! reading any chunk payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::Id;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hierarchy {
  counts: BTreeMap<Id, u64>,
}

impl Hierarchy {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, id: Id, count: u64) {
    self.counts.insert(id, count);
  }

  pub fn get(&self, id: &Id) -> Option<u64> {
    self.counts.get(id).copied()
  }

  pub fn contains(&self, id: &Id) -> bool {
    self.counts.contains_key(id)
  }

  /// Stored nodes, including branches.
  pub fn len(&self) -> usize {
    self.counts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.counts.is_empty()
  }

  pub fn point_count(&self) -> u64 {
    self.counts.values().sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Id, u64)> {
    self.counts.iter().map(|(id, count)| (id, *count))
  }

  /// Replace entries with those of `other`.
  pub fn overlay(&mut self, other: &Hierarchy) {
    for (id, count) in &other.counts {
      self.counts.insert(id.clone(), *count);
    }
  }

  /// Sum counts node by node.
  pub fn merge(&mut self, other: &Hierarchy) {
    for (id, count) in &other.counts {
      *self.counts.entry(id.clone()).or_insert(0) += count;
    }
  }
}

impl FromIterator<(Id, u64)> for Hierarchy {
  fn from_iter<T: IntoIterator<Item = (Id, u64)>>(iter: T) -> Self {
    Self {
      counts: iter.into_iter().collect(),
    }
  }
}
