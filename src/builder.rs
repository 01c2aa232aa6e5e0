//! One-pass cache builder
//!
//! Streams the container's records through the codec into a new cache file,
//! recording the cache-side byte offset of every record. The resulting
//! [`OffsetIndex`] refers to the cache file, never to the container; the two
//! offset spaces are unrelated.
//!
//! Re-running a build against the same output path truncates and rewrites
//! the file, so stale caches never grow silently. There is no transactional
//! guarantee: a mid-stream failure leaves a partial cache that the caller
//! must delete.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::codec::{CodecError, RecordCodec};
use crate::index::OffsetIndex;
use crate::model::SpectrumMeta;
use crate::mzml::{MzmlError, RecordStreamer};

/// Errors from building a cache file
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    /// The cache destination could not be created
    #[error("unable to create cache file {path}: {source}")]
    UnableToCreateFile {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// I/O error while writing records
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record encoding error
    #[error("encode error: {0}")]
    Codec(#[from] CodecError),

    /// Error streaming records out of the container
    #[error("container error: {0}")]
    Source(#[from] MzmlError),
}

/// Everything a single build pass produces besides the cache file itself
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Cache-side offset index, in source order
    pub index: OffsetIndex,
    /// Resident metadata table, parallel to `index.spectra`
    pub spectrum_meta: Vec<SpectrumMeta>,
}

/// Incremental writer producing a cache file and its offset index.
///
/// Records are appended in call order; the positional ids callers use later
/// are exactly the order of `append_*` calls per kind. Callers that have no
/// native identifier should pass the sequential position rendered as a
/// string.
#[derive(Debug)]
pub struct CacheBuilder<W: Write + Seek> {
    writer: W,
    index: OffsetIndex,
}

impl CacheBuilder<BufWriter<File>> {
    /// Create (or truncate) the cache file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, BuilderError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| BuilderError::UnableToCreateFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Seek> CacheBuilder<W> {
    /// Wrap an already-open writer positioned at the start of the cache
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            index: OffsetIndex::new(),
        }
    }

    /// Append one spectrum record; returns its cache-file offset
    pub fn append_spectrum(
        &mut self,
        id: &str,
        mz: &[f64],
        intensity: &[f64],
    ) -> Result<u64, BuilderError> {
        let offset = RecordCodec::write(&mut self.writer, mz, intensity)?;
        self.index.push_spectrum(id, offset);
        Ok(offset)
    }

    /// Append one chromatogram record; returns its cache-file offset
    pub fn append_chromatogram(
        &mut self,
        id: &str,
        rt: &[f64],
        intensity: &[f64],
    ) -> Result<u64, BuilderError> {
        let offset = RecordCodec::write(&mut self.writer, rt, intensity)?;
        self.index.push_chromatogram(id, offset);
        Ok(offset)
    }

    /// Number of spectra appended so far
    pub fn spectrum_count(&self) -> usize {
        self.index.spectrum_count()
    }

    /// Number of chromatograms appended so far
    pub fn chromatogram_count(&self) -> usize {
        self.index.chromatogram_count()
    }

    /// Flush the cache file and hand back the completed offset index
    pub fn finish(mut self) -> Result<OffsetIndex, BuilderError> {
        self.writer.flush()?;
        Ok(self.index)
    }
}

/// Convert an mzML container into a cache file in one streaming pass.
///
/// Reads every spectrum and then every chromatogram from `container_path`,
/// writing them in that order to `cache_path`. Returns the cache-side offset
/// index together with the resident spectrum metadata table; hosts should
/// keep both (persisting the index if they want to skip the rebuild scan on
/// later opens).
pub fn build_cache<P: AsRef<Path>, Q: AsRef<Path>>(
    container_path: P,
    cache_path: Q,
) -> Result<BuildOutput, BuilderError> {
    let mut source = RecordStreamer::open(container_path.as_ref())?;
    let mut builder = CacheBuilder::create(cache_path.as_ref())?;
    let mut spectrum_meta = Vec::new();

    while let Some(spectrum) = source.next_spectrum()? {
        builder.append_spectrum(
            &spectrum.id,
            &spectrum.record.mz_or_rt,
            &spectrum.record.intensity,
        )?;
        spectrum_meta.push(spectrum.meta);
    }
    while let Some(chromatogram) = source.next_chromatogram()? {
        builder.append_chromatogram(
            &chromatogram.id,
            &chromatogram.record.mz_or_rt,
            &chromatogram.record.intensity,
        )?;
    }

    info!(
        "cached {} spectra and {} chromatograms from {} into {}",
        builder.spectrum_count(),
        builder.chromatogram_count(),
        container_path.as_ref().display(),
        cache_path.as_ref().display()
    );

    let index = builder.finish()?;
    Ok(BuildOutput {
        index,
        spectrum_meta,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::RecordCodec;

    #[test]
    fn test_builder_records_offsets_in_order() -> Result<(), BuilderError> {
        let mut builder = CacheBuilder::new(Cursor::new(Vec::new()));

        builder.append_spectrum("scan=1", &[1.0, 2.0], &[10.0, 20.0])?;
        builder.append_spectrum("scan=2", &[], &[])?;
        builder.append_chromatogram("TIC", &[0.1], &[5.0])?;

        let index = builder.finish()?;
        assert_eq!(index.spectrum_count(), 2);
        assert_eq!(index.chromatogram_count(), 1);
        assert_eq!(index.spectra[0].offset, 0);
        assert_eq!(index.spectra[1].offset, 36);
        assert_eq!(index.chromatograms[0].offset, 40);
        Ok(())
    }

    #[test]
    fn test_offsets_decode_back_to_the_same_records() -> Result<(), BuilderError> {
        let mut cursor = Cursor::new(Vec::new());
        let index = {
            let mut builder = CacheBuilder::new(&mut cursor);
            builder.append_spectrum("a", &[7.0, 8.0, 9.0], &[1.0, 2.0, 3.0])?;
            builder.append_spectrum("b", &[3.5], &[99.9])?;
            builder.finish()?
        };

        let offset = index.spectrum_offset(1).expect("in range");
        let record = RecordCodec::read(&mut cursor, offset)?;
        assert_eq!(record.mz_or_rt, vec![3.5]);
        assert_eq!(record.intensity, vec![99.9]);
        Ok(())
    }

    #[test]
    fn test_unwritable_destination() {
        let err = CacheBuilder::create("/nonexistent-dir/deep/cache.bin").unwrap_err();
        assert!(matches!(err, BuilderError::UnableToCreateFile { .. }));
    }
}
