//! The searchable collection: unit vectors paired with their catalog records.
//!
//! On disk an index is a directory holding two files:
//!
//! * `index.bin`, little-endian: magic `IFIX`, `u32` version, `u32` dimension,
//!   `u64` count, then `count * dimension` `f32` values.
//! * `meta.json`, a JSON array with one [`MetadataRecord`] per vector, in the same order.

use crate::embedding::{dot, is_unit_norm, l2_norm};
use crate::error::{FinderError, Result};
use crate::metadata::MetadataRecord;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const VECTORS_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "meta.json";

const MAGIC: &[u8; 4] = b"IFIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// One indexed image: its embedding and the record describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedImage {
    pub vector: Vec<f32>,
    pub record: MetadataRecord,
}

/// A search hit. `position` is the entry's slot in the store.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub position: usize,
    pub score: f32,
    pub entry: &'a IndexedImage,
}

/// Exact inner-product index over unit vectors.
///
/// Built once, append-only while building, read-only afterwards.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dim: usize,
    entries: Vec<IndexedImage>,
}

impl IndexStore {
    #[must_use]
    pub const fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: Vec::new(),
        }
    }

    pub fn from_entries(dim: usize, entries: Vec<IndexedImage>) -> Result<Self> {
        let mut store = Self::with_capacity(dim, entries.len());
        for entry in entries {
            store.push(entry)?;
        }
        Ok(store)
    }

    #[must_use]
    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        Self {
            dim,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry. Its vector must have the store's dimension and unit length.
    pub fn push(&mut self, entry: IndexedImage) -> Result<()> {
        if entry.vector.len() != self.dim {
            return Err(FinderError::Inference(format!(
                "vector for {} has dimension {}, index expects {}",
                entry.record.image_path,
                entry.vector.len(),
                self.dim
            )));
        }
        if !is_unit_norm(&entry.vector) {
            return Err(FinderError::Inference(format!(
                "vector for {} is not unit length (norm {})",
                entry.record.image_path,
                l2_norm(&entry.vector)
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexedImage] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&IndexedImage> {
        self.entries.get(position)
    }

    /// The `k` entries with the highest inner product with `query`, best first.
    /// Equal scores keep insertion order. Returns fewer than `k` hits when the
    /// store is smaller than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor<'_>>> {
        if query.len() != self.dim {
            return Err(FinderError::Inference(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .par_iter()
            .map(|entry| dot(&entry.vector, query))
            .enumerate()
            .collect();

        let by_score = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_score);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_score);

        Ok(scored
            .into_iter()
            .map(|(position, score)| Neighbor {
                position,
                score,
                entry: &self.entries[position],
            })
            .collect())
    }

    /// Write `index.bin` and `meta.json` into `dir`, creating it if needed.
    ///
    /// Both files are written under temporary names first and renamed once
    /// complete, so an interrupted save never leaves a half-written pair.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let vectors_tmp = dir.join(format!("{VECTORS_FILE}.tmp"));
        let metadata_tmp = dir.join(format!("{METADATA_FILE}.tmp"));

        let mut writer = BufWriter::new(File::create(&vectors_tmp)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        let dim = u32::try_from(self.dim).map_err(|_| too_large("dimension"))?;
        writer.write_all(&dim.to_le_bytes())?;
        writer.write_all(&(self.entries.len() as u64).to_le_bytes())?;
        for entry in &self.entries {
            for value in &entry.vector {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        let records: Vec<&MetadataRecord> = self.entries.iter().map(|e| &e.record).collect();
        let mut writer = BufWriter::new(File::create(&metadata_tmp)?);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.flush()?;

        fs::rename(&vectors_tmp, dir.join(VECTORS_FILE))?;
        fs::rename(&metadata_tmp, dir.join(METADATA_FILE))?;
        info!(
            "Saved index ({} vectors, dim {}) and metadata to {}",
            self.len(),
            self.dim,
            dir.display()
        );
        Ok(())
    }

    /// Load an index directory written by [`IndexStore::save`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let vectors_path = dir.join(VECTORS_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        for path in [&vectors_path, &metadata_path] {
            if !path.is_file() {
                return Err(FinderError::IndexUnavailable(format!(
                    "Index files not found in {}",
                    dir.display()
                )));
            }
        }

        let bytes = fs::read(&vectors_path)?;
        let (dim, vectors) = decode_vectors(&bytes, &vectors_path)?;
        let records: Vec<MetadataRecord> = serde_json::from_slice(&fs::read(&metadata_path)?)?;

        if records.len() != vectors.len() {
            return Err(FinderError::CorruptIndex(format!(
                "{} holds {} vectors but {} holds {} records",
                vectors_path.display(),
                vectors.len(),
                metadata_path.display(),
                records.len()
            )));
        }

        let entries = vectors
            .into_iter()
            .zip(records)
            .map(|(vector, record)| IndexedImage { vector, record })
            .collect();
        let store = Self::from_entries(dim, entries)
            .map_err(|e| FinderError::CorruptIndex(e.to_string()))?;
        info!(
            "Loaded index with {} vectors (dim {}) from {}",
            store.len(),
            store.dim,
            dir.display()
        );
        Ok(store)
    }
}

fn too_large(what: &str) -> FinderError {
    FinderError::CorruptIndex(format!("{what} does not fit the index header"))
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn decode_vectors(bytes: &[u8], path: &Path) -> Result<(usize, Vec<Vec<f32>>)> {
    let corrupt = |msg: &str| FinderError::CorruptIndex(format!("{}: {msg}", path.display()));

    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes(read_array(bytes, 4));
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {version}")));
    }
    let dim = u32::from_le_bytes(read_array(bytes, 8)) as usize;
    let count = usize::try_from(u64::from_le_bytes(read_array(bytes, 12)))
        .map_err(|_| corrupt("vector count overflows"))?;
    if dim == 0 {
        return Err(corrupt("zero dimension"));
    }

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt("vector count overflows"))?;
    if body.len() != expected {
        return Err(corrupt(&format!(
            "expected {expected} bytes of vector data, found {}",
            body.len()
        )));
    }

    let vectors = body
        .chunks_exact(dim * 4)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
        .collect();
    Ok((dim, vectors))
}
