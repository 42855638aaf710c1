//! Synset metadata and validation ground truth from the devkit.

use crate::archive::{ArchiveListing};
use crate::error::{CacheError, CacheResult};

use csv::{Reader as CsvReader, Writer as CsvWriter};
use log::{info};
use serde::{Deserialize};

use std::collections::{BTreeMap, HashMap};
use std::fs::{File};
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::{Path};

pub const META_SUFFIX:          &str = "data/meta.csv";
pub const GROUND_TRUTH_SUFFIX:  &str = "data/ILSVRC2012_validation_ground_truth.txt";

pub const NAME_TABLE_FILE:  &str = "synsets_id_name.csv";
pub const WORD_TABLE_FILE:  &str = "synsets_id_word.csv";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Synset {
  pub id:     i32,
  pub name:   String,
  pub words:  String,
}

#[derive(Deserialize)]
struct SynsetRecord {
  #[serde(rename = "ILSVRC2012_ID")]
  id:     i32,
  #[serde(rename = "WNID")]
  wnid:   String,
  words:  String,
}

#[derive(Clone, Debug, Default)]
pub struct SynsetTable {
  by_id:      BTreeMap<i32, Synset>,
  name_to_id: HashMap<String, i32>,
}

impl SynsetTable {
  pub fn new(synsets: Vec<Synset>) -> CacheResult<SynsetTable> {
    let mut table = SynsetTable::default();
    for synset in synsets {
      if table.by_id.contains_key(&synset.id) || table.name_to_id.contains_key(&synset.name) {
        return Err(CacheError::DuplicateSynset{id: synset.id, name: synset.name});
      }
      table.name_to_id.insert(synset.name.clone(), synset.id);
      table.by_id.insert(synset.id, synset);
    }
    Ok(table)
  }

  /// Reads `ILSVRC2012_ID,WNID,words` records.
  pub fn read_csv<R: Read>(reader: R, source: &str) -> CacheResult<SynsetTable> {
    let mut reader = CsvReader::from_reader(reader);
    let mut synsets = vec![];
    for record in reader.deserialize() {
      let record: SynsetRecord = record.map_err(|e| CacheError::csv(source, e))?;
      synsets.push(Synset{id: record.id, name: record.wnid, words: record.words});
    }
    SynsetTable::new(synsets)
  }

  pub fn len(&self) -> usize {
    self.by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_id.is_empty()
  }

  pub fn id_of(&self, name: &str) -> Option<i32> {
    self.name_to_id.get(name).cloned()
  }

  pub fn name_of(&self, id: i32) -> Option<&str> {
    self.by_id.get(&id).map(|s| s.name.as_str())
  }

  pub fn words_of(&self, id: i32) -> Option<&str> {
    self.by_id.get(&id).map(|s| s.words.as_str())
  }

  /// Synsets in ascending id order.
  pub fn iter(&self) -> impl Iterator<Item = &Synset> {
    self.by_id.values()
  }

  pub fn write_name_table<W: Write>(&self, writer: W) -> csv::Result<()> {
    let mut writer = CsvWriter::from_writer(writer);
    for synset in self.iter() {
      writer.write_record(&[synset.id.to_string(), synset.name.clone()])?;
    }
    writer.flush()?;
    Ok(())
  }

  pub fn write_word_table<W: Write>(&self, mut writer: W) -> io::Result<()> {
    for synset in self.iter() {
      writeln!(writer, "{},{}", synset.id, quote_words(&synset.words))?;
    }
    writer.flush()
  }

  pub fn write_tables(&self, dir: &Path) -> CacheResult<()> {
    let names_path = dir.join(NAME_TABLE_FILE);
    let file = File::create(&names_path).map_err(|e| CacheError::io(&names_path, e))?;
    self.write_name_table(file).map_err(|e| CacheError::csv(&names_path, e))?;

    let words_path = dir.join(WORD_TABLE_FILE);
    let file = File::create(&words_path).map_err(|e| CacheError::io(&words_path, e))?;
    self.write_word_table(BufWriter::new(file)).map_err(|e| CacheError::io(&words_path, e))?;
    Ok(())
  }
}

/// `"a, b ,c"` becomes `"a","b","c"`. Words are written as they are, with
/// no escaping of embedded quotes.
pub fn quote_words(words: &str) -> String {
  words.split(',')
    .map(|w| format!("\"{}\"", w.trim()))
    .collect::<Vec<_>>()
    .join(",")
}

/// 1-indexed validation labels in ascending filename order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroundTruth {
  labels: Vec<i32>,
}

impl GroundTruth {
  pub fn from_labels(labels: Vec<i32>) -> GroundTruth {
    GroundTruth{labels}
  }

  pub fn parse<R: BufRead>(reader: R, source: &str) -> CacheResult<GroundTruth> {
    let mut labels = vec![];
    for (idx, line) in reader.lines().enumerate() {
      let line = line.map_err(|e| CacheError::io(source, e))?;
      let text = line.trim();
      if text.is_empty() {
        continue;
      }
      match text.parse::<i32>() {
        Ok(label) => labels.push(label),
        Err(_) => return Err(CacheError::GroundTruthParse{line: idx + 1, text: line.clone()}),
      }
    }
    Ok(GroundTruth{labels})
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn as_slice(&self) -> &[i32] {
    &self.labels
  }

  /// The entries only line up with the sorted validation names when the
  /// counts agree; nothing else about the pairing can be checked here.
  pub fn check_len(&self, archive: &str, members: usize) -> CacheResult<()> {
    if self.labels.len() != members {
      return Err(CacheError::GroundTruthLengthMismatch{
        archive: archive.to_string(),
        ground_truth: self.labels.len(),
        members,
      });
    }
    Ok(())
  }
}

pub struct Devkit {
  pub synsets:      SynsetTable,
  pub ground_truth: GroundTruth,
}

impl Devkit {
  pub fn open(path: &Path) -> CacheResult<Devkit> {
    let listing = ArchiveListing::open(path)?;
    Devkit::from_listing(&listing)
  }

  pub fn from_listing(devkit: &ArchiveListing) -> CacheResult<Devkit> {
    let member = |suffix: &'static str| {
      devkit.find_suffix(suffix).ok_or_else(|| CacheError::MissingDevkitMember{
        devkit: devkit.label.clone(),
        suffix,
      })
    };

    let meta = member(META_SUFFIX)?;
    let source = format!("{}:{}", devkit.label, meta.name);
    let synsets = SynsetTable::read_csv(devkit.member_bytes(meta)?, &source)?;

    let gt = member(GROUND_TRUTH_SUFFIX)?;
    let source = format!("{}:{}", devkit.label, gt.name);
    let ground_truth = GroundTruth::parse(devkit.member_bytes(gt)?, &source)?;

    info!("devkit: {} synsets, {} validation labels", synsets.len(), ground_truth.len());
    Ok(Devkit{synsets, ground_truth})
  }
}
