//! Memory-pressure gauge shared by the builder and the registry.

use std::sync::atomic::{AtomicU32, Ordering};

/// Fraction of the resident chunk budget in use.
///
/// Reads and writes are relaxed: the value steers how eagerly chunks are
/// clipped and is allowed to lag behind the true resident count.
#[derive(Debug, Default)]
pub struct Usage(AtomicU32);

impl Usage {
  pub fn new(value: f32) -> Self {
    Self(AtomicU32::new(value.to_bits()))
  }

  #[inline]
  pub fn get(&self) -> f32 {
    f32::from_bits(self.0.load(Ordering::Relaxed))
  }

  #[inline]
  pub fn set(&self, value: f32) {
    self.0.store(value.to_bits(), Ordering::Relaxed);
  }

  /// Set from a resident count. A zero budget never reports pressure.
  pub fn update(&self, resident: usize, budget: usize) {
    let value = if budget == 0 {
      0.0
    } else {
      resident as f32 / budget as f32
    };
    self.set(value);
  }
}
