//! Sorted pair tables and their CSV/JSON output

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::transform::PairMap;

pub const CSV_HEADER: &str = "NAME_1,NAME_2,COUNT_SET,COUNT_MULTISET";
pub const ATTRIBUTES_CSV_HEADER: &str = "NAME,CMC,TYPE_LINE";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardAttributes {
    pub cmc: f64,
    pub type_line: String,
}

/// Card attributes by name, in name order.
pub type AttributeMap = BTreeMap<String, CardAttributes>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooccurrencePair {
    pub name1: String,
    pub name2: String,
    pub count_set: u64,
    pub count_multiset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMetadata {
    pub total_collections: usize,
    pub total_pairs: usize,
    pub game: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CooccurrenceReport {
    pub pairs: Vec<CooccurrencePair>,
    pub metadata: ReportMetadata,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: AttributeMap,
}

impl CooccurrenceReport {
    /// Build a report with pairs sorted by first then second name.
    pub fn from_pairs(pairs: PairMap, total_collections: usize, game: impl Into<String>) -> Self {
        let mut pairs: Vec<CooccurrencePair> = pairs
            .into_iter()
            .map(|((name1, name2), c)| CooccurrencePair {
                name1,
                name2,
                count_set: c.set,
                count_multiset: c.multiset,
            })
            .collect();
        pairs.sort_unstable_by(|a, b| (&a.name1, &a.name2).cmp(&(&b.name1, &b.name2)));
        let total_pairs = pairs.len();
        Self {
            pairs,
            metadata: ReportMetadata {
                total_collections,
                total_pairs,
                game: game.into(),
            },
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        write_atomic(path, |w| {
            writeln!(w, "{CSV_HEADER}")?;
            for p in &self.pairs {
                writeln!(
                    w,
                    "{},{},{},{}",
                    csv_field(&p.name1),
                    csv_field(&p.name2),
                    p.count_set,
                    p.count_multiset
                )?;
            }
            Ok(())
        })
    }

    /// Card attributes as `NAME,CMC,TYPE_LINE` rows, sorted by name.
    pub fn write_attributes_csv(&self, path: &Path) -> Result<()> {
        write_atomic(path, |w| {
            writeln!(w, "{ATTRIBUTES_CSV_HEADER}")?;
            for (name, attrs) in &self.attributes {
                writeln!(w, "{},{},{}", csv_field(name), attrs.cmc, csv_field(&attrs.type_line))?;
            }
            Ok(())
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_atomic(path, |w| {
            serde_json::to_writer_pretty(&mut *w, self)?;
            writeln!(w)?;
            Ok(())
        })
    }
}

/// Quote a field containing a comma, quote or line break.
fn csv_field(s: &str) -> std::borrow::Cow<'_, str> {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\"")).into()
    } else {
        s.into()
    }
}

/// Write through `{path}.tmp`, renaming into place once complete.
fn write_atomic(path: &Path, write: impl FnOnce(&mut BufWriter<File>) -> Result<()>) -> Result<()> {
    let mut tmp = PathBuf::from(path);
    tmp.as_mut_os_string().push(".tmp");

    let file = File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    let mut w = BufWriter::new(file);
    let written = write(&mut w).and_then(|()| {
        w.flush()?;
        Ok(())
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.context(format!("failed to write {}", path.display())));
    }
    drop(w);
    fs::rename(&tmp, path).with_context(|| format!("failed to rename into {}", path.display()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}
