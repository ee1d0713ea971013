//! Worker pools built on rayon.
//!
//! Each `Pool` owns a dedicated, named `rayon::ThreadPool` so insertion and
//! clip work never compete for the same threads. Results come back over a
//! crossbeam channel in completion order.
//!
//! # Usage
//!
//! ```ignore
//! let pool = Pool::new("work", 4)?;
//! pool.spawn(move || expensive_computation());
//!
//! // Block for the next finished task
//! while let Some(result) = pool.next() {
//!     let value = result?;
//! }
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Worker panics are reported through `Pool::next`; the data they leave
/// behind stays usable.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size pool returning task results through a channel.
pub struct Pool<T: Send + 'static> {
  name: String,
  pool: rayon::ThreadPool,
  tx: Sender<thread::Result<T>>,
  rx: Receiver<thread::Result<T>>,
  outstanding: AtomicUsize,
}

impl<T: Send + 'static> Pool<T> {
  /// Create a pool of `threads` workers named `{name}-{i}`.
  pub fn new(name: &str, threads: usize) -> Result<Self> {
    let prefix = name.to_string();
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads.max(1))
      .thread_name(move |i| format!("{prefix}-{i}"))
      .build()
      .map_err(|e| Error::Pool(format!("{name}: {e}")))?;
    let (tx, rx) = crossbeam_channel::unbounded();
    Ok(Self {
      name: name.to_string(),
      pool,
      tx,
      rx,
      outstanding: AtomicUsize::new(0),
    })
  }

  /// Queue work (non-blocking).
  pub fn spawn<F>(&self, work: F)
  where
    F: FnOnce() -> T + Send + 'static,
  {
    self.outstanding.fetch_add(1, Ordering::SeqCst);
    let tx = self.tx.clone();
    self.pool.spawn(move || {
      let result = panic::catch_unwind(AssertUnwindSafe(work));
      // The receiver lives as long as the pool.
      let _ = tx.send(result);
    });
  }

  /// Tasks spawned whose results have not been taken.
  pub fn outstanding(&self) -> usize {
    self.outstanding.load(Ordering::SeqCst)
  }

  /// Block for the next finished task. `None` once nothing is outstanding.
  ///
  /// Other threads may take results through `try_next` meanwhile, so the
  /// wait re-checks the outstanding count between polls.
  pub fn next(&self) -> Option<Result<T>> {
    loop {
      if self.outstanding() == 0 {
        return None;
      }
      match self.rx.recv_timeout(POLL_INTERVAL) {
        Ok(result) => {
          self.outstanding.fetch_sub(1, Ordering::SeqCst);
          return Some(self.unwrap_result(result));
        }
        Err(RecvTimeoutError::Timeout) => continue,
        Err(e) => return Some(Err(Error::Pool(format!("{}: {e}", self.name)))),
      }
    }
  }

  fn unwrap_result(&self, result: thread::Result<T>) -> Result<T> {
    result.map_err(|payload| {
      Error::Pool(format!(
        "{} worker panicked: {}",
        self.name,
        panic_message(payload.as_ref())
      ))
    })
  }

  /// Next finished task, if one is ready.
  pub fn try_next(&self) -> Option<Result<T>> {
    let received = self.rx.try_recv().ok()?;
    self.outstanding.fetch_sub(1, Ordering::SeqCst);
    Some(self.unwrap_result(received))
  }

  /// Wait for every outstanding task.
  pub fn join(&self) -> Vec<Result<T>> {
    let mut results = Vec::with_capacity(self.outstanding());
    while let Some(result) = self.next() {
      results.push(result);
    }
    results
  }

  pub fn num_threads(&self) -> usize {
    self.pool.current_num_threads()
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn test_results_come_back() {
    let pool = Pool::new("test", 2).unwrap();
    for i in 0..10u64 {
      pool.spawn(move || i * 2);
    }
    let mut values: Vec<u64> = pool.join().into_iter().map(|r| r.unwrap()).collect();
    values.sort();
    assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(pool.outstanding(), 0);
    assert!(pool.next().is_none());
  }

  #[test]
  fn test_panic_is_reported() {
    let pool: Pool<()> = Pool::new("boom", 1).unwrap();
    pool.spawn(|| panic!("kaboom"));
    let result = pool.next().unwrap();
    match result {
      Err(Error::Pool(msg)) => assert!(msg.contains("kaboom"), "{msg}"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn test_try_next_does_not_block() {
    let pool: Pool<u32> = Pool::new("poll", 1).unwrap();
    assert!(pool.try_next().is_none());
    pool.spawn(|| 7);
    let value = loop {
      if let Some(result) = pool.try_next() {
        break result.unwrap();
      }
      thread::yield_now();
    };
    assert_eq!(value, 7);
    assert_eq!(pool.outstanding(), 0);
  }

  #[test]
  fn test_lock_recovers_poison() {
    let mutex = Arc::new(Mutex::new(5));
    let clone = Arc::clone(&mutex);
    let _ = thread::spawn(move || {
      let _guard = clone.lock().unwrap();
      panic!("poison");
    })
    .join();
    assert!(mutex.is_poisoned());
    assert_eq!(*lock(&mutex), 5);
  }

  #[test]
  fn test_thread_count() {
    let pool: Pool<()> = Pool::new("sized", 3).unwrap();
    assert_eq!(pool.num_threads(), 3);
    let clamped: Pool<()> = Pool::new("clamped", 0).unwrap();
    assert_eq!(clamped.num_threads(), 1);
  }
}
