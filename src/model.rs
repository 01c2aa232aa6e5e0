//! Core data types shared across the cache layer

use serde::{Deserialize, Serialize};

/// One spectrum's or chromatogram's pair of numeric arrays.
///
/// For spectra the first array holds m/z values; for chromatograms it holds
/// retention times. The two arrays always have identical length (enforced at
/// construction and by the cache codec), and zero-length records are valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// m/z values (spectra) or retention times (chromatograms)
    pub mz_or_rt: Vec<f64>,
    /// Signal intensities, parallel to `mz_or_rt`
    pub intensity: Vec<f64>,
}

impl Record {
    /// Create a record from two equal-length arrays.
    ///
    /// Returns `None` if the arrays differ in length; the equal-length
    /// invariant is not negotiable anywhere in the cache layer.
    pub fn new(mz_or_rt: Vec<f64>, intensity: Vec<f64>) -> Option<Self> {
        if mz_or_rt.len() != intensity.len() {
            return None;
        }
        Some(Self { mz_or_rt, intensity })
    }

    /// Number of data points in this record
    pub fn len(&self) -> usize {
        self.mz_or_rt.len()
    }

    /// Whether the record holds no data points
    pub fn is_empty(&self) -> bool {
        self.mz_or_rt.is_empty()
    }
}

/// Lightweight per-spectrum metadata, kept fully resident.
///
/// Keyed by the same positional id as the spectrum records. Populated once
/// during the metadata pass over the container and never mutated afterward;
/// serving it from memory lets callers filter spectra without touching the
/// cache file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumMeta {
    /// Scan start time in seconds
    pub retention_time: f64,
    /// MS level (1 for survey scans, 2+ for fragmentation)
    pub ms_level: u8,
}

impl Default for SpectrumMeta {
    fn default() -> Self {
        Self {
            retention_time: 0.0,
            ms_level: 1,
        }
    }
}

/// Which of the two record lists an id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Mass spectrum (m/z + intensity)
    Spectrum,
    /// Chromatogram (time + intensity)
    Chromatogram,
}

impl RecordKind {
    /// Lowercase name as used in mzML `<index name="...">` attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Spectrum => "spectrum",
            RecordKind::Chromatogram => "chromatogram",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_rejects_unequal_arrays() {
        assert!(Record::new(vec![1.0, 2.0], vec![10.0]).is_none());
        let r = Record::new(vec![1.0, 2.0], vec![10.0, 20.0]).expect("equal lengths");
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_empty_record_is_valid() {
        let r = Record::new(Vec::new(), Vec::new()).expect("empty is fine");
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }
}
