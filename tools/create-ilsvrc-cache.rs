use ilsvrc_cache::{BarProgress, CacheConfig, CancelToken, FileCacheStore, ShapeMode, create_cache};
use ilsvrc_cache::config::{DEFAULT_FILE_CACHE_SIZE, DEFAULT_HEIGHT, DEFAULT_WIDTH};

use clap::{Parser};
use log::{error, info, warn};

use std::path::{PathBuf};
use std::process;

/// Convert ILSVRC2012 train/validation tar archives into image caches.
///
/// An archive holding only `nXXXXXXXX.tar` members is taken as the train
/// set; one holding only `ILSVRC2012_val_XXXXXXXX.JPEG` members is taken
/// as the validation set.
#[derive(Parser, Debug)]
#[command(name = "create-ilsvrc-cache", version)]
struct Args {
  /// Source tar archives.
  #[arg(required = true, num_args = 1..)]
  input: Vec<PathBuf>,

  /// Destination directory.
  output: PathBuf,

  /// Devkit tar archive, plain or gzipped. It must hold
  /// `data/ILSVRC2012_validation_ground_truth.txt` and `data/meta.csv`
  /// (the synset table as `ILSVRC2012_ID,WNID,words`).
  #[arg(short = 'D', long)]
  devkit: PathBuf,

  /// Width of output images.
  #[arg(short = 'W', long, default_value_t = DEFAULT_WIDTH)]
  width: u32,

  /// Height of output images.
  #[arg(short = 'H', long, default_value_t = DEFAULT_HEIGHT)]
  height: u32,

  /// Shaping mode (trimming or padding).
  #[arg(short, long, default_value = "trimming")]
  mode: ShapeMode,

  /// Shuffle both caches (true) or neither (false). When omitted the
  /// train cache is shuffled and the validation cache is not.
  #[arg(short = 'S', long, value_parser = parse_flag)]
  shuffle: Option<bool>,

  /// Shuffle the train cache, overriding --shuffle.
  #[arg(long, value_parser = parse_flag)]
  train_shuffle: Option<bool>,

  /// Shuffle the validation cache, overriding --shuffle.
  #[arg(long, value_parser = parse_flag)]
  val_shuffle: Option<bool>,

  /// Number of samples per cache file.
  #[arg(short = 'N', long, default_value_t = DEFAULT_FILE_CACHE_SIZE)]
  file_cache_size: usize,

  /// Keep every n-th image only.
  #[arg(long, default_value_t = 1)]
  thinning: usize,

  /// Number of image loading threads.
  #[arg(short = 'j', long, default_value_t = 1)]
  workers: usize,

  /// Seed for the shuffle order.
  #[arg(long)]
  seed: Option<u64>,
}

fn parse_flag(s: &str) -> Result<bool, String> {
  match s.to_ascii_lowercase().as_str() {
    "true" => Ok(true),
    "false" => Ok(false),
    _ => Err(format!("expected True or False, got {}", s)),
  }
}

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();

  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
      warn!("failed to install interrupt handler: {}", e);
    }
  }

  let config = CacheConfig{
    width:            args.width,
    height:           args.height,
    mode:             args.mode,
    thinning:         args.thinning,
    shuffle:          args.shuffle,
    train_shuffle:    args.train_shuffle,
    valid_shuffle:    args.val_shuffle,
    file_cache_size:  args.file_cache_size,
    num_workers:      args.workers,
    seed:             args.seed,
    output_dir:       args.output,
  };
  let store = FileCacheStore::new(config.file_cache_size, config.num_workers, config.seed);
  let progress = BarProgress::new();

  match create_cache(&config, &args.input, &args.devkit, &store, &progress, &cancel) {
    Ok(summary) => {
      if let Some(train) = summary.train {
        info!("train cache: {} samples in {} files", train.num_samples, train.num_shards);
      }
      if let Some(valid) = summary.valid {
        info!("validation cache: {} samples in {} files", valid.num_samples, valid.num_shards);
      }
    }
    Err(e) => {
      if e.is_cancelled() {
        warn!("interrupted, no cache was written for the unfinished set");
      } else {
        error!("{}", e);
      }
      process::exit(e.exit_code());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use clap::{CommandFactory};

  #[test]
  fn cli_definition_is_consistent() {
    Args::command().debug_assert();
  }

  #[test]
  fn parses_short_flags() {
    let args = Args::try_parse_from(&[
      "create-ilsvrc-cache", "train.tar", "val.tar", "out",
      "-D", "devkit.tar", "-W", "64", "-H", "48", "-m", "padding", "-S", "False", "--thinning", "10",
    ]).unwrap();
    assert_eq!(vec![PathBuf::from("train.tar"), PathBuf::from("val.tar")], args.input);
    assert_eq!(PathBuf::from("out"), args.output);
    assert_eq!((64, 48), (args.width, args.height));
    assert_eq!(ShapeMode::Pad, args.mode);
    assert_eq!(Some(false), args.shuffle);
    assert_eq!(10, args.thinning);
  }

  #[test]
  fn shuffle_flags_per_role() {
    let args = Args::try_parse_from(&[
      "create-ilsvrc-cache", "val.tar", "out", "-D", "devkit.tar.gz",
      "--train-shuffle", "false", "--val-shuffle", "TRUE",
    ]).unwrap();
    assert_eq!(None, args.shuffle);
    assert_eq!(Some(false), args.train_shuffle);
    assert_eq!(Some(true), args.val_shuffle);
  }

  #[test]
  fn devkit_is_required() {
    assert!(Args::try_parse_from(&["create-ilsvrc-cache", "train.tar", "out"]).is_err());
  }
}
