use ilsvrc_cache::{CacheConfig, CacheError, CancelToken, FileCacheStore, NoProgress, ShapeMode, create_cache};

use image::{ImageBuffer, ImageOutputFormat, Rgb};
use ndarray::{Array, Ix2, Ix4};
use ndarray_npy::{ReadNpyExt};
use tar::{Builder, Header};
use tempfile::{TempDir};

use std::fs::{self, File};
use std::io::{Cursor};
use std::path::{Path, PathBuf};

const META: &str = "ILSVRC2012_ID,WNID,words\n\
                    1,n01440764,\"tench, Tinca tinca\"\n\
                    2,n01443537,\"goldfish, Carassius auratus\"\n";

fn tar_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
  let mut builder = Builder::new(vec![]);
  for &(name, ref data) in members.iter() {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, &data[..]).unwrap();
  }
  builder.into_inner().unwrap()
}

fn png(w: u32, h: u32, value: u8) -> Vec<u8> {
  let im = ImageBuffer::from_pixel(w, h, Rgb([value, value, value]));
  let mut buf = Cursor::new(vec![]);
  image::DynamicImage::ImageRgb8(im).write_to(&mut buf, ImageOutputFormat::Png).unwrap();
  buf.into_inner()
}

fn write_tar(dir: &Path, name: &str, members: &[(&str, Vec<u8>)]) -> PathBuf {
  let path = dir.join(name);
  fs::write(&path, tar_bytes(members)).unwrap();
  path
}

fn write_devkit(dir: &Path, ground_truth: &str) -> PathBuf {
  write_tar(dir, "devkit.tar", &[
    ("ILSVRC2012_devkit_t12/data/meta.csv", META.as_bytes().to_vec()),
    ("ILSVRC2012_devkit_t12/data/ILSVRC2012_validation_ground_truth.txt", ground_truth.as_bytes().to_vec()),
  ])
}

fn write_train(dir: &Path, stray: Option<&str>) -> PathBuf {
  let mut tench = vec![
    ("n01440764_18.JPEG", png(8, 6, 10)),
    ("n01440764_36.JPEG", png(5, 9, 20)),
  ];
  if let Some(name) = stray {
    tench.push((name, png(4, 4, 30)));
  }
  let goldfish = vec![("n01443537_2.JPEG", png(4, 4, 40))];
  write_tar(dir, "train.tar", &[
    ("n01440764.tar", tar_bytes(&tench)),
    ("n01443537.tar", tar_bytes(&goldfish)),
  ])
}

fn write_valid(dir: &Path) -> PathBuf {
  write_tar(dir, "val.tar", &[
    ("ILSVRC2012_val_00000003.JPEG", png(7, 3, 1)),
    ("ILSVRC2012_val_00000001.JPEG", png(3, 7, 2)),
    ("ILSVRC2012_val_00000002.JPEG", png(4, 4, 3)),
  ])
}

fn images(path: &Path) -> Array<u8, Ix4> {
  Array::<u8, Ix4>::read_npy(File::open(path).unwrap()).unwrap()
}

fn labels(path: &Path) -> Vec<i32> {
  let y = Array::<i32, Ix2>::read_npy(File::open(path).unwrap()).unwrap();
  y.iter().cloned().collect()
}

fn config(out: &Path) -> CacheConfig {
  let mut config = CacheConfig::new(out);
  config.width = 4;
  config.height = 4;
  config.shuffle = Some(false);
  config
}

fn run(config: &CacheConfig, inputs: &[PathBuf], devkit: &Path) -> Result<ilsvrc_cache::RunSummary, CacheError> {
  let store = FileCacheStore::new(config.file_cache_size, config.num_workers, config.seed);
  create_cache(config, inputs, devkit, &store, &NoProgress, &CancelToken::new())
}

#[test]
fn builds_train_and_validation_caches() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let inputs = vec![write_valid(dir.path()), write_train(dir.path(), None)];
  let devkit = write_devkit(dir.path(), "2\n1\n2\n");

  let mut config = config(&out);
  config.num_workers = 2;
  let summary = run(&config, &inputs, &devkit).unwrap();
  assert_eq!(3, summary.train.unwrap().num_samples);
  assert_eq!(3, summary.valid.unwrap().num_samples);

  assert_eq!(vec![0, 0, 1], labels(&out.join("train/cache_00000000_y.npy")));
  // Sorted names 1, 2, 3 take ground truth 2, 1, 2.
  assert_eq!(vec![1, 0, 1], labels(&out.join("val/cache_00000000_y.npy")));

  let x = images(&out.join("val/cache_00000000_x.npy"));
  assert_eq!(&[3, 3, 4, 4], x.shape());
  // ILSVRC2012_val_00000002 is already 4x4 and kept as is.
  assert!(x.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 3));

  let names = fs::read_to_string(out.join("synsets_id_name.csv")).unwrap();
  assert_eq!("1,n01440764\n2,n01443537\n", names);
  let words = fs::read_to_string(out.join("synsets_id_word.csv")).unwrap();
  assert_eq!("1,\"tench\",\"Tinca tinca\"\n2,\"goldfish\",\"Carassius auratus\"\n", words);
}

#[test]
fn thinning_applies_to_both_sets() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let inputs = vec![write_train(dir.path(), None), write_valid(dir.path())];
  let devkit = write_devkit(dir.path(), "2\n1\n2\n");

  let mut config = config(&out);
  config.thinning = 2;
  config.mode = ShapeMode::Pad;
  config.file_cache_size = 1;
  let summary = run(&config, &inputs, &devkit).unwrap();
  let train = summary.train.unwrap();
  assert_eq!((2, 2), (train.num_samples, train.num_shards));
  assert_eq!(vec![0], labels(&out.join("train/cache_00000000_y.npy")));
  assert_eq!(vec![1], labels(&out.join("train/cache_00000001_y.npy")));
  assert_eq!(vec![1], labels(&out.join("val/cache_00000000_y.npy")));
  assert_eq!(vec![1], labels(&out.join("val/cache_00000001_y.npy")));
}

#[test]
fn shuffle_is_set_per_role() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let inputs = vec![write_train(dir.path(), None), write_valid(dir.path())];
  let devkit = write_devkit(dir.path(), "2\n1\n2\n");

  let mut config = config(&out);
  config.train_shuffle = Some(false);
  config.valid_shuffle = Some(true);
  config.seed = Some(11);
  run(&config, &inputs, &devkit).unwrap();

  assert_eq!("0\n1\n2\n", fs::read_to_string(out.join("train/order.csv")).unwrap());
  assert_eq!(vec![0, 0, 1], labels(&out.join("train/cache_00000000_y.npy")));

  let order: Vec<usize> = fs::read_to_string(out.join("val/order.csv")).unwrap()
    .lines()
    .map(|l| l.parse().unwrap())
    .collect();
  let mut sorted = order.clone();
  sorted.sort();
  assert_eq!(vec![0, 1, 2], sorted);
  // Unshuffled validation labels are 1, 0, 1.
  let expected: Vec<i32> = order.iter().map(|&i| [1, 0, 1][i]).collect();
  assert_eq!(expected, labels(&out.join("val/cache_00000000_y.npy")));
}

#[test]
fn validation_failure_keeps_finished_train_cache() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let valid = write_tar(dir.path(), "val.tar", &[
    ("ILSVRC2012_val_00000001.JPEG", png(4, 4, 1)),
    ("ILSVRC2012_val_00000002.JPEG", b"truncated".to_vec()),
  ]);
  let inputs = vec![write_train(dir.path(), None), valid];
  let devkit = write_devkit(dir.path(), "1\n2\n");

  let err = run(&config(&out), &inputs, &devkit).unwrap_err();
  assert!(matches!(err, CacheError::Decode{..}));
  assert_eq!(65, err.exit_code());

  assert_eq!(vec![0, 0, 1], labels(&out.join("train/cache_00000000_y.npy")));
  assert!(out.join("train/cache_index.csv").exists());
  assert!(out.join("synsets_id_name.csv").exists());
  let leftovers: Vec<_> = fs::read_dir(out.join("val")).unwrap().collect();
  assert!(leftovers.is_empty());
}

#[test]
fn stray_train_member_writes_nothing() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let inputs = vec![write_train(dir.path(), Some("wrong_1.JPEG"))];
  let devkit = write_devkit(dir.path(), "");

  match run(&config(&out), &inputs, &devkit) {
    Err(CacheError::InvalidTrainMember{member, ..}) => assert_eq!("wrong_1.JPEG", member),
    other => panic!("unexpected: {:?}", other),
  }
  assert!(!out.exists());
}

#[test]
fn ground_truth_must_cover_validation_set() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let inputs = vec![write_valid(dir.path())];
  let devkit = write_devkit(dir.path(), "1\n2\n");

  let res = run(&config(&out), &inputs, &devkit);
  assert!(matches!(res, Err(CacheError::GroundTruthLengthMismatch{ground_truth: 2, members: 3, ..})));
  assert!(!out.exists());
}

#[test]
fn two_validation_archives_are_rejected() {
  let dir = TempDir::new().unwrap();
  let out = dir.path().join("out");
  let first = write_valid(dir.path());
  let second = dir.path().join("val2.tar");
  fs::copy(&first, &second).unwrap();
  let devkit = write_devkit(dir.path(), "1\n1\n1\n");

  let res = run(&config(&out), &[first, second], &devkit);
  assert!(matches!(res, Err(CacheError::DuplicateArchiveRole{..})));
  assert!(!out.exists());
}

#[test]
fn zero_thinning_is_a_config_error() {
  let dir = TempDir::new().unwrap();
  let mut config = config(&dir.path().join("out"));
  config.thinning = 0;
  let err = run(&config, &[], Path::new("devkit.tar")).unwrap_err();
  assert_eq!(2, err.exit_code());
}
