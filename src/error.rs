use crate::archive::{ArchiveRole};

use thiserror::{Error};

use std::io;
use std::path::{PathBuf};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("invalid member {member} includes in archive {archive}")]
  InvalidArchiveMember { archive: String, member: String },
  #[error("archive {archive} mixes train and validation members (conflicting member {member})")]
  MixedArchiveContent { archive: String, member: String },
  #[error("please specify only 1 {role} archive (got {first} and {second})")]
  DuplicateArchiveRole { role: ArchiveRole, first: String, second: String },
  #[error("invalid file {member} includes in category archive {category} of {archive}")]
  InvalidTrainMember { archive: String, category: String, member: String },
  #[error("category {category} of archive {archive} has no synset")]
  UnknownCategory { archive: String, category: String },
  #[error("duplicate synset (id {id}, name {name})")]
  DuplicateSynset { id: i32, name: String },
  #[error("ground truth has {ground_truth} entries but validation archive {archive} has {members} images")]
  GroundTruthLengthMismatch { archive: String, ground_truth: usize, members: usize },
  #[error("malformed ground truth at line {line}: {text:?}")]
  GroundTruthParse { line: usize, text: String },
  #[error("devkit {devkit} has no member ending in {suffix}")]
  MissingDevkitMember { devkit: String, suffix: &'static str },
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  #[error("failed to decode image {locator}: {source}")]
  Decode {
    locator: String,
    #[source]
    source: image::ImageError,
  },
  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("csv error at {path}: {source}")]
  Csv {
    path: PathBuf,
    #[source]
    source: csv::Error,
  },
  #[error("npy error at {path}: {source}")]
  Npy {
    path: PathBuf,
    #[source]
    source: ndarray_npy::WriteNpyError,
  },
  #[error("shard at {path} has a malformed shape: {source}")]
  ShardShape {
    path: PathBuf,
    #[source]
    source: ndarray::ShapeError,
  },
  #[error("bad member pattern for category {category}: {source}")]
  Pattern {
    category: String,
    #[source]
    source: regex::Error,
  },
  #[error("{h}x{w} image cannot be shaped to {height}x{width}: extent overflows")]
  ReshapeOverflow { h: u32, w: u32, height: u32, width: u32 },
  #[error("sample index {index} out of range for {len} samples")]
  IndexOutOfRange { index: usize, len: usize },
  #[error("cache at {path} is incomplete: wrote {written} of {expected} samples")]
  Incomplete { path: PathBuf, expected: usize, written: usize },
  #[error("interrupted")]
  Cancelled,
}

impl CacheError {
  pub fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> CacheError {
    CacheError::Io{path: path.into(), source}
  }

  pub fn csv<P: Into<PathBuf>>(path: P, source: csv::Error) -> CacheError {
    CacheError::Csv{path: path.into(), source}
  }

  pub fn npy<P: Into<PathBuf>>(path: P, source: ndarray_npy::WriteNpyError) -> CacheError {
    CacheError::Npy{path: path.into(), source}
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, CacheError::Cancelled)
  }

  /// Process exit code for the top-level handler.
  pub fn exit_code(&self) -> i32 {
    match *self {
      CacheError::InvalidConfig(_) => 2,
      CacheError::InvalidArchiveMember{..} |
      CacheError::MixedArchiveContent{..} |
      CacheError::DuplicateArchiveRole{..} |
      CacheError::InvalidTrainMember{..} |
      CacheError::UnknownCategory{..} |
      CacheError::DuplicateSynset{..} |
      CacheError::GroundTruthLengthMismatch{..} |
      CacheError::GroundTruthParse{..} |
      CacheError::MissingDevkitMember{..} |
      CacheError::Decode{..} |
      CacheError::ReshapeOverflow{..} => 65,
      CacheError::Io{..} |
      CacheError::Csv{..} |
      CacheError::Npy{..} => 74,
      CacheError::ShardShape{..} |
      CacheError::Pattern{..} |
      CacheError::IndexOutOfRange{..} |
      CacheError::Incomplete{..} => 70,
      CacheError::Cancelled => 130,
    }
  }
}
