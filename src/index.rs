//! Offset index structures for random access
//!
//! An [`OffsetIndex`] maps positional ids to byte offsets, one ordered list
//! per record kind. The same structure serves two distinct offset spaces:
//! offsets into the original mzML container (produced by the trailer parser)
//! and offsets into the binary cache file (produced by the cache builder).
//! The two must never be mixed; an index is only meaningful against the file
//! it was built from.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One index entry: a native identifier and a byte offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetEntry {
    /// Spectrum or chromatogram id, unique within its kind
    pub id: String,
    /// Byte offset into the indexed file
    pub offset: u64,
}

/// Ordered per-kind offset lists.
///
/// Insertion order is id order in the source: callers address records by
/// position (the Nth spectrum), not by identifier string, so order is
/// significant and the lists are append-only once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetIndex {
    /// Spectrum entries, in source order
    pub spectra: Vec<OffsetEntry>,
    /// Chromatogram entries, in source order
    pub chromatograms: Vec<OffsetEntry>,
}

/// Errors from persisting or loading an index sidecar
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OffsetIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spectrum entries
    pub fn spectrum_count(&self) -> usize {
        self.spectra.len()
    }

    /// Number of chromatogram entries
    pub fn chromatogram_count(&self) -> usize {
        self.chromatograms.len()
    }

    /// Whether the index holds no entries of either kind
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty() && self.chromatograms.is_empty()
    }

    /// Append a spectrum entry
    pub fn push_spectrum(&mut self, id: impl Into<String>, offset: u64) {
        self.spectra.push(OffsetEntry {
            id: id.into(),
            offset,
        });
    }

    /// Append a chromatogram entry
    pub fn push_chromatogram(&mut self, id: impl Into<String>, offset: u64) {
        self.chromatograms.push(OffsetEntry {
            id: id.into(),
            offset,
        });
    }

    /// Byte offset of the spectrum at `id`, if in range
    pub fn spectrum_offset(&self, id: usize) -> Option<u64> {
        self.spectra.get(id).map(|e| e.offset)
    }

    /// Byte offset of the chromatogram at `id`, if in range
    pub fn chromatogram_offset(&self, id: usize) -> Option<u64> {
        self.chromatograms.get(id).map(|e| e.offset)
    }

    /// Persist the index as a JSON sidecar.
    ///
    /// Hosts that keep the sidecar next to the cache file can skip the
    /// rebuild scan entirely on the next open.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), IndexError> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load an index previously written by [`save_json`](Self::save_json)
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let file = File::open(path.as_ref())?;
        let index = serde_json::from_reader(BufReader::new(file))?;
        Ok(index)
    }
}
