use crate::archive::{ArchiveClassifier, ArchiveListing};
use crate::cache::{CacheStore, CacheSummary};
use crate::config::{CacheConfig};
use crate::error::{CacheError, CacheResult};
use crate::index::{SampleIndex, build_train_index, build_validation_index};
use crate::labels::{Devkit};
use crate::progress::{CancelToken, Progress};

use log::{info};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc};

pub const TRAIN_DIR: &str = "train";
pub const VALID_DIR: &str = "val";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub train:  Option<CacheSummary>,
  pub valid:  Option<CacheSummary>,
}

/// Converts the input archives into train/validation caches under
/// `config.output_dir`.
///
/// Every archive is listed, classified and indexed before anything is
/// written, so malformed inputs leave the destination untouched. The train
/// and validation caches are then committed one after the other, and each
/// is complete or absent on its own: a failure while loading validation
/// images keeps the finished `train/` cache and the label tables, and
/// leaves no shards under `val/`.
pub fn create_cache(
    config: &CacheConfig,
    inputs: &[PathBuf],
    devkit_path: &Path,
    store: &dyn CacheStore,
    progress: &dyn Progress,
    cancel: &CancelToken,
) -> CacheResult<RunSummary> {
  config.validate()?;
  let stride = config.stride()?;

  let mut listings = Vec::with_capacity(inputs.len());
  for input in inputs.iter() {
    cancel.check()?;
    info!("Checking input file [{}]", input.display());
    listings.push(ArchiveListing::open(input)?);
  }
  let classified = ArchiveClassifier::new().classify_all(listings)?;
  let devkit = Devkit::open(devkit_path)?;

  let train_index = match classified.train {
    Some(ref listing) => Some(build_train_index(listing, &devkit.synsets, stride, progress, cancel)?),
    None => None,
  };
  cancel.check()?;
  let valid_index = match classified.validation {
    Some(ref listing) => Some(build_validation_index(listing, &devkit.ground_truth, stride)?),
    None => None,
  };

  let output = &config.output_dir;
  fs::create_dir_all(output).map_err(|e| CacheError::io(output.as_path(), e))?;
  devkit.synsets.write_tables(output)?;

  let mut summary = RunSummary::default();
  if let Some(index) = train_index {
    summary.train = Some(store_index(config, &index, config.shuffle_train(), &output.join(TRAIN_DIR), store, progress, cancel)?);
  }
  if let Some(index) = valid_index {
    summary.valid = Some(store_index(config, &index, config.shuffle_valid(), &output.join(VALID_DIR), store, progress, cancel)?);
  }
  Ok(summary)
}

fn store_index(
    config: &CacheConfig,
    index: &SampleIndex,
    shuffle: bool,
    dest: &Path,
    store: &dyn CacheStore,
    progress: &dyn Progress,
    cancel: &CancelToken,
) -> CacheResult<CacheSummary> {
  info!("StartCreatingCache: {} ({} archive {})", dest.display(), index.role, index.archive());
  let loader = index.loader(config.width, config.height, config.mode);
  store.store(Arc::new(loader), shuffle, dest, progress, cancel)
}
