//! Sharded on-disk cache of normalized samples.
//!
//! Samples are loaded by a pool of workers and reassembled in order by a
//! single writer. Each shard is a pair of `.npy` files: `x` holds a
//! `(n, 3, H, W)` byte array and `y` a `(n, 1)` little-endian int32 array.
//! Shards are staged in a temporary directory inside the destination and
//! only moved into place once every sample has been written.

use crate::error::{CacheError, CacheResult};
use crate::index::{SampleSource};
use crate::normalize::{ChwTensor};
use crate::progress::{CancelToken, Progress};

use csv::{Writer as CsvWriter};
use log::{debug, info};
use ndarray::{Array2, Array4};
use ndarray_npy::{WriteNpyExt};
use rand::{SeedableRng, thread_rng};
use rand::rngs::{StdRng};
use rand::seq::{SliceRandom};
use tempfile::{Builder as TempBuilder, TempDir};
use threadpool::{ThreadPool};
use time::{OffsetDateTime};

use std::collections::{BTreeMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc};
use std::sync::mpsc::{Receiver, sync_channel};

pub const CACHE_INDEX_FILE: &str = "cache_index.csv";
pub const CACHE_INFO_FILE:  &str = "cache_info.csv";
pub const ORDER_FILE:       &str = "order.csv";

const CHANNEL_DEPTH: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSummary {
  pub num_samples:  usize,
  pub num_shards:   usize,
}

/// Persists the samples of a source into a destination directory.
pub trait CacheStore {
  fn store(
      &self,
      source: Arc<dyn SampleSource>,
      shuffle: bool,
      dest: &Path,
      progress: &dyn Progress,
      cancel: &CancelToken,
  ) -> CacheResult<CacheSummary>;
}

#[derive(Clone, Debug)]
pub struct FileCacheStore {
  pub file_cache_size:  usize,
  pub num_workers:      usize,
  pub seed:             Option<u64>,
}

enum LoaderMsg {
  Sample(usize, ChwTensor, i32),
  Failed(usize, CacheError),
}

impl FileCacheStore {
  pub fn new(file_cache_size: usize, num_workers: usize, seed: Option<u64>) -> FileCacheStore {
    FileCacheStore{
      file_cache_size:  file_cache_size.max(1),
      num_workers:      num_workers.max(1),
      seed,
    }
  }

  fn order(&self, len: usize, shuffle: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0 .. len).collect();
    if shuffle {
      match self.seed {
        Some(seed) => order.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => order.shuffle(&mut thread_rng()),
      }
    }
    order
  }

  fn spawn_loaders(
      &self,
      pool: &ThreadPool,
      source: &Arc<dyn SampleSource>,
      order: &Arc<Vec<usize>>,
      cancel: &CancelToken,
      abort: &CancelToken,
  ) -> Receiver<LoaderMsg> {
    let (tx, rx) = sync_channel(CHANNEL_DEPTH);
    let num_workers = self.num_workers;
    for worker in 0 .. num_workers {
      let tx = tx.clone();
      let source = source.clone();
      let order = order.clone();
      let cancel = cancel.clone();
      let abort = abort.clone();
      pool.execute(move || {
        let mut pos = worker;
        while pos < order.len() {
          if cancel.is_cancelled() || abort.is_cancelled() {
            break;
          }
          let msg = match source.load(order[pos]) {
            Ok((x, y)) => LoaderMsg::Sample(pos, x, y),
            Err(e) => LoaderMsg::Failed(pos, e),
          };
          if tx.send(msg).is_err() {
            break;
          }
          pos += num_workers;
        }
      });
    }
    rx
  }

  fn write_all(
      &self,
      rx: &Receiver<LoaderMsg>,
      writer: &mut ShardWriter,
      expected: usize,
      progress: &dyn Progress,
      cancel: &CancelToken,
  ) -> CacheResult<()> {
    let mut pending: BTreeMap<usize, (ChwTensor, i32)> = BTreeMap::new();
    let mut counter = 0;
    while counter < expected {
      cancel.check()?;
      match rx.recv() {
        Err(_) => break,
        Ok(LoaderMsg::Failed(pos, e)) => {
          debug!("loader failed at position {}", pos);
          return Err(e);
        }
        Ok(LoaderMsg::Sample(pos, x, y)) => {
          pending.insert(pos, (x, y));
          while let Some((x, y)) = pending.remove(&counter) {
            writer.push(x, y)?;
            counter += 1;
            progress.advance(1);
          }
        }
      }
    }
    cancel.check()?;
    if counter < expected {
      return Err(CacheError::Incomplete{path: writer.dir.clone(), expected, written: counter});
    }
    writer.flush()
  }
}

impl CacheStore for FileCacheStore {
  fn store(
      &self,
      source: Arc<dyn SampleSource>,
      shuffle: bool,
      dest: &Path,
      progress: &dyn Progress,
      cancel: &CancelToken,
  ) -> CacheResult<CacheSummary> {
    let start_time = OffsetDateTime::now_utc();
    let len = source.len();
    let order = Arc::new(self.order(len, shuffle));
    info!("caching {} samples into {} (shuffle: {})", len, dest.display(), shuffle);

    fs::create_dir_all(dest).map_err(|e| CacheError::io(dest, e))?;
    let staging: TempDir = TempBuilder::new()
      .prefix(".staging-")
      .tempdir_in(dest)
      .map_err(|e| CacheError::io(dest, e))?;
    let mut writer = ShardWriter::new(staging.path(), self.file_cache_size);

    let abort = CancelToken::new();
    let pool = ThreadPool::new(self.num_workers);
    let rx = self.spawn_loaders(&pool, &source, &order, cancel, &abort);
    progress.start("Creating cache", len as u64);
    let res = self.write_all(&rx, &mut writer, len, progress, cancel);
    progress.finish();
    if res.is_err() {
      abort.cancel();
    }
    drop(rx);
    pool.join();
    res?;

    write_metadata(staging.path(), &writer.shards, &order)?;
    cancel.check()?;
    let mut files = vec![CACHE_INDEX_FILE.to_string(), CACHE_INFO_FILE.to_string(), ORDER_FILE.to_string()];
    for &(ref stem, _) in writer.shards.iter() {
      files.push(format!("{}_x.npy", stem));
      files.push(format!("{}_y.npy", stem));
    }
    for file in files.iter() {
      let from = staging.path().join(file);
      fs::rename(&from, dest.join(file)).map_err(|e| CacheError::io(&from, e))?;
    }
    staging.close().map_err(|e| CacheError::io(dest, e))?;

    let elapsed = (OffsetDateTime::now_utc() - start_time).as_seconds_f32();
    info!("wrote {} samples in {} shards, elapsed: {:.3} s", len, writer.shards.len(), elapsed);
    Ok(CacheSummary{num_samples: len, num_shards: writer.shards.len()})
  }
}

struct ShardWriter {
  dir:        PathBuf,
  shard_size: usize,
  shape:      Option<(u32, u32)>,
  xs:         Vec<u8>,
  ys:         Vec<i32>,
  shards:     Vec<(String, usize)>,
}

impl ShardWriter {
  fn new(dir: &Path, shard_size: usize) -> ShardWriter {
    ShardWriter{
      dir:    dir.to_path_buf(),
      shard_size,
      shape:  None,
      xs:     vec![],
      ys:     vec![],
      shards: vec![],
    }
  }

  fn push(&mut self, x: ChwTensor, y: i32) -> CacheResult<()> {
    let shape = (x.height, x.width);
    match self.shape {
      None => self.shape = Some(shape),
      Some(s) if s != shape => {
        let e = io::Error::new(io::ErrorKind::InvalidData, format!("sample shape {:?} differs from {:?}", shape, s));
        return Err(CacheError::io(self.dir.as_path(), e));
      }
      Some(_) => {}
    }
    self.xs.extend_from_slice(&x.data);
    self.ys.push(y);
    if self.ys.len() >= self.shard_size {
      self.flush()?;
    }
    Ok(())
  }

  fn flush(&mut self) -> CacheResult<()> {
    let n = self.ys.len();
    if n == 0 {
      return Ok(());
    }
    let (h, w) = self.shape.unwrap_or((0, 0));
    let stem = format!("cache_{:08}", self.shards.len());

    let x_path = self.dir.join(format!("{}_x.npy", stem));
    let xs = Array4::from_shape_vec((n, 3, h as usize, w as usize), mem::take(&mut self.xs))
      .map_err(|e| CacheError::ShardShape{path: x_path.clone(), source: e})?;
    write_npy(&x_path, &xs)?;
    let y_path = self.dir.join(format!("{}_y.npy", stem));
    let ys = Array2::from_shape_vec((n, 1), mem::take(&mut self.ys))
      .map_err(|e| CacheError::ShardShape{path: y_path.clone(), source: e})?;
    write_npy(&y_path, &ys)?;

    debug!("wrote shard {} ({} samples)", stem, n);
    self.shards.push((stem, n));
    Ok(())
  }
}

fn write_npy<A: WriteNpyExt>(path: &Path, array: &A) -> CacheResult<()> {
  let file = File::create(path).map_err(|e| CacheError::io(path, e))?;
  let mut writer = BufWriter::new(file);
  array.write_npy(&mut writer).map_err(|e| CacheError::npy(path, e))?;
  writer.flush().map_err(|e| CacheError::io(path, e))
}

fn write_metadata(dir: &Path, shards: &[(String, usize)], order: &[usize]) -> CacheResult<()> {
  let index_path = dir.join(CACHE_INDEX_FILE);
  write_csv(&index_path, shards.iter().map(|&(ref stem, n)| vec![stem.clone(), n.to_string()]))?;
  let info_path = dir.join(CACHE_INFO_FILE);
  write_csv(&info_path, vec![vec!["x".to_string()], vec!["y".to_string()]])?;
  let order_path = dir.join(ORDER_FILE);
  write_csv(&order_path, order.iter().map(|i| vec![i.to_string()]))
}

fn write_csv<I>(path: &Path, rows: I) -> CacheResult<()>
where I: IntoIterator<Item = Vec<String>>
{
  let mut writer = CsvWriter::from_path(path).map_err(|e| CacheError::csv(path, e))?;
  for row in rows {
    writer.write_record(&row).map_err(|e| CacheError::csv(path, e))?;
  }
  writer.flush().map_err(|e| CacheError::io(path, e))
}
