//! Builds fixed-size, label-aligned image caches from ILSVRC2012 tar
//! archives.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod labels;
pub mod normalize;
pub mod pipeline;
pub mod progress;

#[cfg(test)]
mod testutil;

pub use crate::archive::{ArchiveClassifier, ArchiveListing, ArchiveRole, ClassifiedArchives};
pub use crate::cache::{CacheStore, CacheSummary, FileCacheStore};
pub use crate::config::{CacheConfig};
pub use crate::error::{CacheError, CacheResult};
pub use crate::index::{ImageLocator, ImageSample, SampleIndex, SampleLoader, SampleSource};
pub use crate::labels::{Devkit, GroundTruth, Synset, SynsetTable};
pub use crate::normalize::{ChwTensor, ShapeMode, normalize};
pub use crate::pipeline::{RunSummary, create_cache};
pub use crate::progress::{BarProgress, CancelToken, NoProgress, Progress};
