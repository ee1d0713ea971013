//! Recycled point buffers.
//!
//! `Pools` keeps idle `PointBuffer`s so streaming a file does not allocate
//! per batch. An `Arena` is scoped to one file task: buffers it hands out
//! are returned to the pool together when the arena drops.

use std::sync::{Arc, Mutex};

use crate::constants::{BUFFER_POINTS, MAX_IDLE_BUFFERS};
use crate::point::PointBuffer;
use crate::threading::lock;

#[derive(Debug)]
pub struct Pools {
  record_size: usize,
  idle: Mutex<Vec<PointBuffer>>,
}

impl Pools {
  pub fn new(record_size: usize) -> Self {
    Self {
      record_size,
      idle: Mutex::new(Vec::new()),
    }
  }

  pub fn record_size(&self) -> usize {
    self.record_size
  }

  /// An empty buffer, recycled when one is idle.
  pub fn acquire(&self) -> PointBuffer {
    match lock(&self.idle).pop() {
      Some(mut buffer) => {
        buffer.reset(self.record_size);
        buffer
      }
      None => PointBuffer::with_capacity(self.record_size, BUFFER_POINTS),
    }
  }

  /// Return buffers. Anything past `MAX_IDLE_BUFFERS` is freed.
  pub fn release<I: IntoIterator<Item = PointBuffer>>(&self, buffers: I) {
    let mut idle = lock(&self.idle);
    for buffer in buffers {
      if idle.len() >= MAX_IDLE_BUFFERS {
        break;
      }
      idle.push(buffer);
    }
  }

  pub fn idle(&self) -> usize {
    lock(&self.idle).len()
  }

  pub fn arena(self: &Arc<Self>) -> Arena {
    Arena {
      pools: Arc::clone(self),
      held: Vec::new(),
    }
  }
}

/// Buffer scope for one task.
#[derive(Debug)]
pub struct Arena {
  pools: Arc<Pools>,
  held: Vec<PointBuffer>,
}

impl Arena {
  /// An empty buffer. Hand it back with `put` when done.
  pub fn take(&mut self) -> PointBuffer {
    match self.held.pop() {
      Some(mut buffer) => {
        buffer.reset(self.pools.record_size);
        buffer
      }
      None => self.pools.acquire(),
    }
  }

  pub fn put(&mut self, buffer: PointBuffer) {
    self.held.push(buffer);
  }

  pub fn record_size(&self) -> usize {
    self.pools.record_size
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    self.pools.release(self.held.drain(..));
  }
}
