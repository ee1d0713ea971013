use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::Endpoint;
use crate::error::Result;

/// Endpoint backed by a directory on local disk.
///
/// Writes go to a sibling temporary file first and are renamed into
/// place, so a reader never sees a partially written key.
#[derive(Clone, Debug)]
pub struct LocalEndpoint {
  root: PathBuf,
}

impl LocalEndpoint {
  /// Open `root`, creating it if needed.
  pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Filesystem path of `key`.
  pub fn path(&self, key: &str) -> PathBuf {
    self.root.join(key)
  }

  /// Delete `key`. Missing keys are not an error.
  pub fn remove(&self, key: &str) -> Result<()> {
    match fs::remove_file(self.path(key)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

impl Endpoint for LocalEndpoint {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    match fs::read(self.path(key)) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
    let path = self.path(key);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let mut staging = path.clone().into_os_string();
    staging.push(".partial");
    fs::write(&staging, bytes)?;
    fs::rename(&staging, &path)?;
    Ok(())
  }

  fn exists(&self, key: &str) -> Result<bool> {
    Ok(self.path(key).try_exists()?)
  }
}
