//! Curated word packs: embedded archive, parsing and the binary cache.
//!
//! Each pack is a gzipped CSV compiled into the binary via `rust-embed`.
//! Rows carry a `<version>_<key>` first column; the version of the first
//! record of the first pack names the persisted cache file, so shipping new
//! data rolls the cache over without any migration step.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;

use crate::errors::WordbankError;

pub mod cache;

pub use cache::WordbankCache;

/// Every curated pack, in derivation-slot order. The first entry anchors the
/// data version.
pub const DATABASE_NAMES: &[&str] = &[
    "adverbs",
    "adjectives",
    "nouns",
    "colors",
    "materials",
    "styles",
    "moods",
    "settings",
    "lighting",
    "eras",
    "mediums",
    "motifs",
];

/// Hard cap on the decompressed size of a single archive entry.
pub const MAX_ENTRY_BYTES: u64 = 8 * 1024 * 1024;

#[derive(rust_embed::RustEmbed)]
#[folder = "assets/wordpacks"]
struct WordpackArchive;

/// One row of a curated pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordRecord {
    /// Key with the version prefix stripped.
    pub key: String,
    /// Remaining raw column values.
    pub columns: Vec<String>,
    /// The full CSV line, kept for substring filtering.
    pub line: String,
}

/// A parsed pack with a key lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordDatabase {
    pub name: String,
    pub version: u32,
    pub records: Vec<WordRecord>,
    /// key → position in `records`.
    pub index: HashMap<String, usize>,
}

impl WordDatabase {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Records whose full CSV line contains at least one of the needles.
    ///
    /// Matching is case-sensitive. An empty needle list keeps everything.
    pub fn filtered(&self, needles: &[String]) -> Vec<&WordRecord> {
        if needles.is_empty() {
            return self.records.iter().collect();
        }
        self.records
            .iter()
            .filter(|r| needles.iter().any(|n| r.line.contains(n.as_str())))
            .collect()
    }
}

/// The full parsed corpus, persisted to disk as bincode.
#[derive(Debug, Serialize, Deserialize)]
pub struct WordbankSnapshot {
    pub version: u32,
    pub built_at: chrono::DateTime<chrono::Utc>,
    /// SHA-256 of the embedded source blobs this snapshot was built from.
    pub source_hash: String,
    pub databases: HashMap<String, WordDatabase>,
}

/// Content hash of the embedded archive, in pack order.
pub fn source_hash() -> String {
    let mut hasher = Sha256::new();
    for name in DATABASE_NAMES {
        hasher.update(name.as_bytes());
        if let Some(file) = WordpackArchive::get(&format!("{name}.csv.gz")) {
            hasher.update(&file.data);
        }
    }
    hex::encode(hasher.finalize())
}

/// Decompress one archive entry, refusing to inflate past `limit` bytes.
pub(crate) fn decompress_limited<R: Read>(
    reader: R,
    name: &str,
    limit: u64,
) -> Result<String, WordbankError> {
    let mut decoder = flate2::read::GzDecoder::new(reader).take(limit + 1);
    let mut buf = Vec::new();
    decoder
        .read_to_end(&mut buf)
        .map_err(|e| WordbankError::Malformed {
            name: name.to_string(),
            message: format!("gzip stream error: {e}"),
        })?;
    if buf.len() as u64 > limit {
        return Err(WordbankError::EntryTooLarge {
            name: name.to_string(),
            limit,
        });
    }
    String::from_utf8(buf).map_err(|e| WordbankError::Malformed {
        name: name.to_string(),
        message: format!("not valid UTF-8: {e}"),
    })
}

fn read_entry(name: &str) -> Result<String, WordbankError> {
    let file =
        WordpackArchive::get(&format!("{name}.csv.gz")).ok_or_else(|| {
            WordbankError::UnknownDatabase {
                name: name.to_string(),
            }
        })?;
    decompress_limited(file.data.as_ref(), name, MAX_ENTRY_BYTES)
}

/// Parse one pack straight from the embedded archive.
///
/// This is the slow path the cache falls back to when a persisted entry is
/// missing or unreadable.
pub fn parse_database(name: &str) -> Result<WordDatabase, WordbankError> {
    let text = read_entry(name)?;
    parse_csv(name, &text)
}

fn parse_csv(name: &str, text: &str) -> Result<WordDatabase, WordbankError> {
    let mut records = Vec::new();
    let mut index = HashMap::new();
    let mut version = None;

    // First row is the column header.
    for line in text.lines().skip(1) {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split(',').map(str::to_string);
        let raw_key = columns.next().unwrap_or_default();
        let (prefix, key) = raw_key
            .split_once('_')
            .ok_or_else(|| WordbankError::Malformed {
                name: name.to_string(),
                message: format!("record key {raw_key:?} has no version prefix"),
            })?;
        let row_version: u32 = prefix.parse().map_err(|_| WordbankError::Malformed {
            name: name.to_string(),
            message: format!("record key {raw_key:?} has a non-numeric version"),
        })?;
        version.get_or_insert(row_version);

        index.insert(key.to_string(), records.len());
        records.push(WordRecord {
            key: key.to_string(),
            columns: columns.collect(),
            line: line.to_string(),
        });
    }

    let version = version.ok_or_else(|| WordbankError::Malformed {
        name: name.to_string(),
        message: "pack has no records".to_string(),
    })?;
    Ok(WordDatabase {
        name: name.to_string(),
        version,
        records,
        index,
    })
}

/// The data version shipped in the embedded archive: the version prefix of
/// the first record of the first pack.
pub fn embedded_version() -> Result<u32, WordbankError> {
    let first = DATABASE_NAMES
        .first()
        .context("no packs configured")
        .map_err(WordbankError::Other)?;
    Ok(parse_database(first)?.version)
}
