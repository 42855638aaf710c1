use crate::error::{CacheError, CacheResult};
use crate::normalize::{ShapeMode};

use std::num::{NonZeroUsize};
use std::path::{PathBuf};

pub const DEFAULT_WIDTH:            u32 = 320;
pub const DEFAULT_HEIGHT:           u32 = 320;
pub const DEFAULT_FILE_CACHE_SIZE:  usize = 100;
/// Largest accepted output extent; also the largest JPEG extent.
pub const MAX_EXTENT:               u32 = 65535;

#[derive(Clone, Debug)]
pub struct CacheConfig {
  pub width:            u32,
  pub height:           u32,
  pub mode:             ShapeMode,
  pub thinning:         usize,
  /// Applies to both caches unless a per-role override is set. When
  /// nothing is set the train cache is shuffled and the validation cache
  /// keeps index order.
  pub shuffle:          Option<bool>,
  pub train_shuffle:    Option<bool>,
  pub valid_shuffle:    Option<bool>,
  pub file_cache_size:  usize,
  pub num_workers:      usize,
  pub seed:             Option<u64>,
  pub output_dir:       PathBuf,
}

impl CacheConfig {
  pub fn new<P: Into<PathBuf>>(output_dir: P) -> CacheConfig {
    CacheConfig{
      width:            DEFAULT_WIDTH,
      height:           DEFAULT_HEIGHT,
      mode:             ShapeMode::Trim,
      thinning:         1,
      shuffle:          None,
      train_shuffle:    None,
      valid_shuffle:    None,
      file_cache_size:  DEFAULT_FILE_CACHE_SIZE,
      num_workers:      1,
      seed:             None,
      output_dir:       output_dir.into(),
    }
  }

  pub fn validate(&self) -> CacheResult<()> {
    if self.width == 0 || self.height == 0 {
      return Err(CacheError::InvalidConfig(format!("output size must be positive, got {}x{}", self.width, self.height)));
    }
    if self.width > MAX_EXTENT || self.height > MAX_EXTENT {
      return Err(CacheError::InvalidConfig(format!("output size {}x{} exceeds {} per side", self.width, self.height, MAX_EXTENT)));
    }
    if self.thinning == 0 {
      return Err(CacheError::InvalidConfig("thinning rate must be at least 1".to_string()));
    }
    if self.file_cache_size == 0 {
      return Err(CacheError::InvalidConfig("file cache size must be at least 1".to_string()));
    }
    if self.num_workers == 0 {
      return Err(CacheError::InvalidConfig("number of workers must be at least 1".to_string()));
    }
    Ok(())
  }

  pub fn stride(&self) -> CacheResult<NonZeroUsize> {
    NonZeroUsize::new(self.thinning)
      .ok_or_else(|| CacheError::InvalidConfig("thinning rate must be at least 1".to_string()))
  }

  pub fn shuffle_train(&self) -> bool {
    self.train_shuffle.or(self.shuffle).unwrap_or(true)
  }

  pub fn shuffle_valid(&self) -> bool {
    self.valid_shuffle.or(self.shuffle).unwrap_or(false)
  }
}
