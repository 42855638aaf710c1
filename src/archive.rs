//! Tar archive listings and train/validation classification.
//!
//! Archives are memory-mapped once and never extracted. Each listed member
//! remembers where its data lives inside the mapping, which is also how the
//! per-category archives nested in the train set are listed.

use crate::error::{CacheError, CacheResult};

use flate2::read::{GzDecoder};
use log::{debug, warn};
use memmap::{Mmap};
use regex::{Regex};
use tar::{Archive};

use std::fmt;
use std::fs::{File};
use std::io::{self, Cursor, Read};
use std::path::{Path};
use std::sync::{Arc};

pub const TRAIN_MEMBER_PATTERN: &str = r"^n[0-9]{8}\.tar$";
pub const VALID_MEMBER_PATTERN: &str = r"^ILSVRC2012_val_[0-9]{8}\.JPEG$";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveRole {
  Train,
  Validation,
  Unknown,
}

impl fmt::Display for ArchiveRole {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ArchiveRole::Train => write!(f, "train"),
      ArchiveRole::Validation => write!(f, "validation"),
      ArchiveRole::Unknown => write!(f, "unknown"),
    }
  }
}

enum Backing {
  Mapped(Mmap),
  Owned(Vec<u8>),
}

/// Shared read-only archive contents.
#[derive(Clone)]
pub struct ArchiveBytes {
  backing:  Arc<Backing>,
}

impl ArchiveBytes {
  pub fn map(path: &Path) -> io::Result<ArchiveBytes> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
      // Zero-length files cannot be mapped.
      return Ok(ArchiveBytes::from_vec(vec![]));
    }
    let map = unsafe { Mmap::map(&file)? };
    Ok(ArchiveBytes{backing: Arc::new(Backing::Mapped(map))})
  }

  /// Maps a plain tar file, or inflates a gzipped one into memory.
  pub fn open(path: &Path) -> io::Result<ArchiveBytes> {
    let bytes = ArchiveBytes::map(path)?;
    if !bytes.as_slice().starts_with(&GZIP_MAGIC) {
      return Ok(bytes);
    }
    let mut buf = vec![];
    GzDecoder::new(bytes.as_slice()).read_to_end(&mut buf)?;
    debug!("inflated {} to {} bytes", path.display(), buf.len());
    Ok(ArchiveBytes::from_vec(buf))
  }

  pub fn from_vec(buf: Vec<u8>) -> ArchiveBytes {
    ArchiveBytes{backing: Arc::new(Backing::Owned(buf))}
  }

  pub fn as_slice(&self) -> &[u8] {
    match *self.backing {
      Backing::Mapped(ref map) => &map[..],
      Backing::Owned(ref buf) => &buf[..],
    }
  }

  pub fn slice(&self, offset: u64, len: u64) -> Option<&[u8]> {
    let start = offset as usize;
    let end = start.checked_add(len as usize)?;
    self.as_slice().get(start .. end)
  }
}

impl fmt::Debug for ArchiveBytes {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "ArchiveBytes({} bytes)", self.as_slice().len())
  }
}

/// A member name and the absolute byte range of its data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberEntry {
  pub name:   String,
  pub offset: u64,
  pub len:    u64,
}

/// Lists the members of the tar archive in `data`, whose first byte sits at
/// absolute offset `base`.
pub fn list_members(data: &[u8], base: u64) -> io::Result<Vec<MemberEntry>> {
  let mut archive = Archive::new(Cursor::new(data));
  let mut members = vec![];
  for entry in archive.entries()? {
    let entry = entry?;
    let name = entry.path()?.to_string_lossy().into_owned();
    let len = entry.header().size()?;
    members.push(MemberEntry{
      name,
      offset: base + entry.raw_file_position(),
      len,
    });
  }
  Ok(members)
}

#[derive(Debug)]
pub struct ArchiveListing {
  pub label:    String,
  pub bytes:    ArchiveBytes,
  pub members:  Vec<MemberEntry>,
}

impl ArchiveListing {
  pub fn open(path: &Path) -> CacheResult<ArchiveListing> {
    let bytes = ArchiveBytes::open(path).map_err(|e| CacheError::io(path, e))?;
    let members = list_members(bytes.as_slice(), 0).map_err(|e| CacheError::io(path, e))?;
    debug!("listed {} members of {}", members.len(), path.display());
    Ok(ArchiveListing{
      label: path.display().to_string(),
      bytes,
      members,
    })
  }

  pub fn from_bytes<S: Into<String>>(label: S, buf: Vec<u8>) -> CacheResult<ArchiveListing> {
    let label = label.into();
    let bytes = ArchiveBytes::from_vec(buf);
    let members = list_members(bytes.as_slice(), 0).map_err(|e| CacheError::io(label.as_str(), e))?;
    Ok(ArchiveListing{label, bytes, members})
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.members.iter().map(|m| m.name.as_str())
  }

  pub fn find_suffix(&self, suffix: &str) -> Option<&MemberEntry> {
    self.members.iter().find(|m| m.name.ends_with(suffix))
  }

  pub fn member_bytes(&self, member: &MemberEntry) -> CacheResult<&[u8]> {
    self.bytes.slice(member.offset, member.len).ok_or_else(|| {
      let e = io::Error::new(io::ErrorKind::UnexpectedEof, format!("member {} is truncated", member.name));
      CacheError::io(self.label.as_str(), e)
    })
  }

  /// Lists the members of a tar archive stored as `member`.
  pub fn nested_members(&self, member: &MemberEntry) -> CacheResult<Vec<MemberEntry>> {
    let data = self.member_bytes(member)?;
    list_members(data, member.offset)
      .map_err(|e| CacheError::io(format!("{}:{}", self.label, member.name), e))
  }
}

/// Matches `{category}_<digits>.JPEG`, the image names inside one category
/// archive of the train set.
pub fn category_member_regex(category: &str) -> CacheResult<Regex> {
  Regex::new(&format!(r"^{}_[0-9]+\.JPEG$", regex::escape(category)))
    .map_err(|e| CacheError::Pattern{category: category.to_string(), source: e})
}

#[derive(Debug, Default)]
pub struct ClassifiedArchives {
  pub train:      Option<ArchiveListing>,
  pub validation: Option<ArchiveListing>,
}

pub struct ArchiveClassifier {
  train_re: Regex,
  valid_re: Regex,
}

impl Default for ArchiveClassifier {
  fn default() -> ArchiveClassifier {
    ArchiveClassifier::new()
  }
}

impl ArchiveClassifier {
  pub fn new() -> ArchiveClassifier {
    ArchiveClassifier{
      train_re: Regex::new(TRAIN_MEMBER_PATTERN).expect("train member pattern"),
      valid_re: Regex::new(VALID_MEMBER_PATTERN).expect("validation member pattern"),
    }
  }

  pub fn member_role(&self, name: &str) -> ArchiveRole {
    if self.train_re.is_match(name) {
      ArchiveRole::Train
    } else if self.valid_re.is_match(name) {
      ArchiveRole::Validation
    } else {
      ArchiveRole::Unknown
    }
  }

  /// Classifies one archive from its member names. Stops at the first
  /// member that is unrecognized or conflicts with the members before it.
  pub fn classify<'a, I>(&self, archive: &str, names: I) -> CacheResult<ArchiveRole>
  where I: IntoIterator<Item = &'a str>
  {
    let mut role = ArchiveRole::Unknown;
    for name in names {
      match (self.member_role(name), role) {
        (ArchiveRole::Unknown, _) => {
          return Err(CacheError::InvalidArchiveMember{
            archive: archive.to_string(),
            member: name.to_string(),
          });
        }
        (found, ArchiveRole::Unknown) => role = found,
        (found, prev) if found != prev => {
          return Err(CacheError::MixedArchiveContent{
            archive: archive.to_string(),
            member: name.to_string(),
          });
        }
        _ => {}
      }
    }
    Ok(role)
  }

  pub fn classify_all(&self, listings: Vec<ArchiveListing>) -> CacheResult<ClassifiedArchives> {
    let mut classified = ClassifiedArchives::default();
    for listing in listings {
      let role = self.classify(&listing.label, listing.names())?;
      let slot = match role {
        ArchiveRole::Train => &mut classified.train,
        ArchiveRole::Validation => &mut classified.validation,
        ArchiveRole::Unknown => {
          warn!("archive {} has no members, skipping", listing.label);
          continue;
        }
      };
      if let Some(ref first) = *slot {
        return Err(CacheError::DuplicateArchiveRole{
          role,
          first: first.label.clone(),
          second: listing.label,
        });
      }
      debug!("archive {} is a {} archive", listing.label, role);
      *slot = Some(listing);
    }
    Ok(classified)
  }
}
