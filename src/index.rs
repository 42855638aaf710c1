//! Sample indexes over classified archives and the per-index loader handed
//! to the cache store.

use crate::archive::{ArchiveBytes, ArchiveListing, ArchiveRole, category_member_regex};
use crate::error::{CacheError, CacheResult};
use crate::labels::{GroundTruth, SynsetTable};
use crate::normalize::{ChwTensor, ShapeMode, normalize};
use crate::progress::{CancelToken, Progress};

use image::{RgbImage};
use log::{debug, info};
use time::{OffsetDateTime};

use std::fmt;
use std::io;
use std::num::{NonZeroUsize};
use std::sync::{Arc};

/// Where the encoded bytes of one image live inside an archive mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageLocator {
  pub member: String,
  pub offset: u64,
  pub len:    u64,
}

impl fmt::Display for ImageLocator {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{} (bytes {}..{})", self.member, self.offset, self.offset + self.len)
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSample {
  /// 1-indexed, as stored in the devkit.
  pub label:    i32,
  pub locator:  ImageLocator,
}

/// Keeps positions `0, stride, 2 * stride, ...`.
pub fn thin<T>(items: Vec<T>, stride: NonZeroUsize) -> Vec<T> {
  items.into_iter().step_by(stride.get()).collect()
}

#[derive(Debug)]
pub struct SampleIndex {
  pub role:   ArchiveRole,
  archive:    String,
  bytes:      ArchiveBytes,
  samples:    Arc<Vec<ImageSample>>,
}

impl SampleIndex {
  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn archive(&self) -> &str {
    &self.archive
  }

  pub fn samples(&self) -> &[ImageSample] {
    &self.samples
  }

  pub fn loader(&self, width: u32, height: u32, mode: ShapeMode) -> SampleLoader {
    SampleLoader{
      archive:  self.archive.clone(),
      bytes:    self.bytes.clone(),
      samples:  self.samples.clone(),
      width,
      height,
      mode,
    }
  }
}

/// Indexes a train archive: every category archive in listing order, and
/// every image in each category in its inner listing order.
pub fn build_train_index(
    listing: &ArchiveListing,
    synsets: &SynsetTable,
    stride: NonZeroUsize,
    progress: &dyn Progress,
    cancel: &CancelToken,
) -> CacheResult<SampleIndex> {
  let start_time = OffsetDateTime::now_utc();
  let mut samples = vec![];
  progress.start("Count image in TAR", listing.members.len() as u64);
  for category_file in listing.members.iter() {
    cancel.check()?;
    let category = category_file.name.strip_suffix(".tar").unwrap_or(category_file.name.as_str());
    let label = synsets.id_of(category).ok_or_else(|| CacheError::UnknownCategory{
      archive:  listing.label.clone(),
      category: category.to_string(),
    })?;
    let member_re = category_member_regex(category)?;
    for im_file in listing.nested_members(category_file)? {
      if !member_re.is_match(&im_file.name) {
        return Err(CacheError::InvalidTrainMember{
          archive:  listing.label.clone(),
          category: category.to_string(),
          member:   im_file.name,
        });
      }
      samples.push(ImageSample{
        label,
        locator: ImageLocator{
          member: format!("{}/{}", category_file.name, im_file.name),
          offset: im_file.offset,
          len:    im_file.len,
        },
      });
    }
    progress.advance(1);
  }
  progress.finish();
  let elapsed = (OffsetDateTime::now_utc() - start_time).as_seconds_f32();
  debug!("counted {} train images in {:.3} s", samples.len(), elapsed);

  let samples = thin(samples, stride);
  info!("Num of data : {}", samples.len());
  Ok(SampleIndex{
    role:     ArchiveRole::Train,
    archive:  listing.label.clone(),
    bytes:    listing.bytes.clone(),
    samples:  Arc::new(samples),
  })
}

/// Indexes a validation archive. Names are sorted by bytes and the i-th
/// name takes the i-th ground truth entry; the devkit lists the ground
/// truth in that same order.
pub fn build_validation_index(
    listing: &ArchiveListing,
    ground_truth: &GroundTruth,
    stride: NonZeroUsize,
) -> CacheResult<SampleIndex> {
  ground_truth.check_len(&listing.label, listing.members.len())?;
  let mut members: Vec<_> = listing.members.iter().collect();
  members.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
  let samples: Vec<_> = members.into_iter()
    .zip(ground_truth.as_slice().iter())
    .map(|(m, &label)| ImageSample{
      label,
      locator: ImageLocator{
        member: m.name.clone(),
        offset: m.offset,
        len:    m.len,
      },
    })
    .collect();

  let samples = thin(samples, stride);
  info!("Num of data : {}", samples.len());
  Ok(SampleIndex{
    role:     ArchiveRole::Validation,
    archive:  listing.label.clone(),
    bytes:    listing.bytes.clone(),
    samples:  Arc::new(samples),
  })
}

/// Produces the sample at a given index position of a cache.
///
/// Implementations must be callable from several threads at once.
pub trait SampleSource: Send + Sync {
  fn len(&self) -> usize;

  fn load(&self, index: usize) -> CacheResult<(ChwTensor, i32)>;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Decodes and normalizes indexed images on demand. Holds only shared,
/// immutable state, so clones can be sent to any number of workers.
#[derive(Clone)]
pub struct SampleLoader {
  archive:  String,
  bytes:    ArchiveBytes,
  samples:  Arc<Vec<ImageSample>>,
  width:    u32,
  height:   u32,
  mode:     ShapeMode,
}

impl SampleLoader {
  pub fn sample(&self, index: usize) -> CacheResult<&ImageSample> {
    self.samples.get(index).ok_or(CacheError::IndexOutOfRange{index, len: self.samples.len()})
  }

  pub fn fetch(&self, sample: &ImageSample) -> CacheResult<&[u8]> {
    let loc = &sample.locator;
    self.bytes.slice(loc.offset, loc.len).ok_or_else(|| {
      let e = io::Error::new(io::ErrorKind::UnexpectedEof, format!("image {} is truncated", loc));
      CacheError::io(self.archive.as_str(), e)
    })
  }

  pub fn decode(&self, sample: &ImageSample) -> CacheResult<RgbImage> {
    let buf = self.fetch(sample)?;
    match image::load_from_memory(buf) {
      Ok(im) => Ok(im.to_rgb8()),
      Err(e) => Err(CacheError::Decode{
        locator: format!("{}:{}", self.archive, sample.locator),
        source: e,
      }),
    }
  }
}

impl SampleSource for SampleLoader {
  fn len(&self) -> usize {
    self.samples.len()
  }

  /// Returns the normalized image and its 0-indexed label.
  fn load(&self, index: usize) -> CacheResult<(ChwTensor, i32)> {
    let sample = self.sample(index)?;
    let image = self.decode(sample)?;
    let x = normalize(&image, self.width, self.height, self.mode)?;
    Ok((x, sample.label - 1))
  }
}
