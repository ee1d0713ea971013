//! Key-addressable byte storage.
//!
//! The index only needs `get`, `put` and an existence check. Durability,
//! retries and remote transport belong to the endpoint implementation.

mod local;
mod memory;

pub use local::LocalEndpoint;
pub use memory::MemoryEndpoint;

use std::fmt;

use crate::error::{Error, Result};

/// Opaque byte store addressed by string keys.
pub trait Endpoint: Send + Sync + fmt::Debug {
  /// Bytes stored under `key`, or `None` if absent.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Store `bytes` under `key`, replacing any previous value.
  fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

  fn exists(&self, key: &str) -> Result<bool>;

  /// Like `get`, but a missing key is an error.
  fn get_required(&self, key: &str) -> Result<Vec<u8>> {
    self
      .get(key)?
      .ok_or_else(|| Error::NotFound(key.to_string()))
  }
}

/// Scheme of a source path such as `s3://bucket/a.laz`, if any.
pub fn scheme(path: &str) -> Option<&str> {
  let (scheme, _) = path.split_once("://")?;
  let valid = !scheme.is_empty()
    && scheme
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
  valid.then_some(scheme)
}

/// True for paths that must be fetched before the executor can read them.
pub fn is_remote(path: &str) -> bool {
  matches!(scheme(path), Some(s) if s != "file")
}

/// Path with any `file://` prefix removed.
pub fn local_path(path: &str) -> &str {
  path.strip_prefix("file://").unwrap_or(path)
}

/// Storage key of a remote path: everything after the scheme separator.
pub fn remote_key(path: &str) -> &str {
  path.split_once("://").map(|(_, rest)| rest).unwrap_or(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scheme_detection() {
    assert_eq!(scheme("s3://bucket/a.xyz"), Some("s3"));
    assert_eq!(scheme("/data/a.xyz"), None);
    assert_eq!(scheme("://nothing"), None);
    assert!(is_remote("http://host/a.xyz"));
    assert!(!is_remote("file:///data/a.xyz"));
    assert!(!is_remote("relative/a.xyz"));
  }

  #[test]
  fn test_path_helpers() {
    assert_eq!(local_path("file:///data/a.xyz"), "/data/a.xyz");
    assert_eq!(local_path("/data/a.xyz"), "/data/a.xyz");
    assert_eq!(remote_key("s3://bucket/a.xyz"), "bucket/a.xyz");
  }

  #[test]
  fn test_get_required_reports_missing_key() {
    let endpoint = MemoryEndpoint::new();
    assert!(matches!(
      endpoint.get_required("nope"),
      Err(Error::NotFound(key)) if key == "nope"
    ));
  }
}
