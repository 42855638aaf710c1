use crate::error::{CacheError, CacheResult};

use indicatif::{ProgressBar, ProgressStyle};

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives progress updates from the long-running stages of a run.
pub trait Progress: Send + Sync {
  fn start(&self, stage: &str, total: u64);
  fn advance(&self, n: u64);
  fn finish(&self);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
  fn start(&self, _stage: &str, _total: u64) {}
  fn advance(&self, _n: u64) {}
  fn finish(&self) {}
}

/// Terminal progress bar, one bar per stage.
#[derive(Default)]
pub struct BarProgress {
  bar:  Mutex<Option<ProgressBar>>,
}

impl BarProgress {
  pub fn new() -> BarProgress {
    BarProgress::default()
  }
}

impl Progress for BarProgress {
  fn start(&self, stage: &str, total: u64) {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{msg:24} [{elapsed_precise}] [{wide_bar}] {pos}/{len} ({eta})") {
      bar.set_style(style);
    }
    bar.set_message(stage.to_string());
    let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(prev) = slot.replace(bar) {
      prev.finish_and_clear();
    }
  }

  fn advance(&self, n: u64) {
    let slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(ref bar) = *slot {
      bar.inc(n);
    }
  }

  fn finish(&self) {
    let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(bar) = slot.take() {
      bar.finish();
    }
  }
}

/// Cooperative cancellation flag shared between the driver, workers and
/// signal handlers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> CancelToken {
    CancelToken::default()
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }

  pub fn check(&self) -> CacheResult<()> {
    if self.is_cancelled() {
      Err(CacheError::Cancelled)
    } else {
      Ok(())
    }
  }
}
