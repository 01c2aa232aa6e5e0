//! Random-access store over a built cache file
//!
//! A [`CachedStore`] answers "give me spectrum N" with one seek and one
//! record decode, regardless of cache size. It holds three things: the cache
//! file path plus an open handle, the immutable offset index (shared via
//! `Arc` between clones), and the fully resident spectrum metadata table.
//!
//! Decoded records are never cached here; callers that reread the same id
//! own that tradeoff. This keeps the store's memory footprint bounded by the
//! index and metadata table alone.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::codec::{CodecError, RecordCodec};
use crate::index::OffsetIndex;
use crate::model::{Record, RecordKind, SpectrumMeta};

/// Errors from opening or reading a cache store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The cache file does not exist
    #[error("cache file not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error, including the backing file disappearing after open
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Positional id past the end of the relevant index list
    #[error("{kind} id {id} out of range: index holds {len} entries")]
    IndexOutOfRange {
        /// Which list was addressed
        kind: &'static str,
        /// The requested positional id
        id: usize,
        /// Number of entries in that list
        len: usize,
    },

    /// The cache file failed record-level validation
    #[error("corrupt cache: {0}")]
    Corrupt(#[from] CodecError),
}

/// Seek-and-decode reader for a binary cache file.
///
/// Construct via [`open_store`] or [`CachedStore::open`], ideally with the
/// precomputed index from the build pass. Without one, the first `get_*`
/// call (or an explicit [`ensure_index`](Self::ensure_index)) rebuilds the
/// index by scanning record headers; this is the documented slow path.
///
/// For concurrent readers, [`try_clone`](Self::try_clone) hands out
/// lightweight clones sharing the immutable index and metadata but owning
/// their own file descriptor, so no file-position state is ever shared.
/// Index the store before cloning; the rebuild mutates the index field and
/// must not race with itself.
#[derive(Debug)]
pub struct CachedStore {
    path: PathBuf,
    file: File,
    index: Option<Arc<OffsetIndex>>,
    spectrum_meta: Arc<Vec<SpectrumMeta>>,
}

impl CachedStore {
    /// Open a cache file, optionally with its precomputed offset index
    pub fn open<P: AsRef<Path>>(
        path: P,
        index: Option<OffsetIndex>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let file = open_cache_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            index: index.map(Arc::new),
            spectrum_meta: Arc::new(Vec::new()),
        })
    }

    /// Attach the resident spectrum metadata table.
    ///
    /// The table is keyed by the same positional id as the spectrum records
    /// and is never mutated after this call.
    pub fn with_spectrum_meta(mut self, meta: Vec<SpectrumMeta>) -> Self {
        self.spectrum_meta = Arc::new(meta);
        self
    }

    /// Whether the store already holds an offset index
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// The offset index, if already present
    pub fn index(&self) -> Option<&OffsetIndex> {
        self.index.as_deref()
    }

    /// Fetch the spectrum at positional id `id`.
    ///
    /// Implicitly triggers [`ensure_index`](Self::ensure_index) on an
    /// unindexed store.
    pub fn get_spectrum(&mut self, id: usize) -> Result<Record, StoreError> {
        let offset = self.lookup(RecordKind::Spectrum, id)?;
        Ok(RecordCodec::read(&mut self.file, offset)?)
    }

    /// Fetch the chromatogram at positional id `id`
    pub fn get_chromatogram(&mut self, id: usize) -> Result<Record, StoreError> {
        let offset = self.lookup(RecordKind::Chromatogram, id)?;
        Ok(RecordCodec::read(&mut self.file, offset)?)
    }

    /// Fetch the resident metadata for the spectrum at positional id `id`.
    ///
    /// Served entirely from memory; never touches the cache file.
    pub fn get_spectrum_meta(&self, id: usize) -> Result<SpectrumMeta, StoreError> {
        self.spectrum_meta
            .get(id)
            .copied()
            .ok_or(StoreError::IndexOutOfRange {
                kind: "spectrum metadata",
                id,
                len: self.spectrum_meta.len(),
            })
    }

    /// Build the offset index by scanning the cache file, if none is held.
    ///
    /// Reads only record-length headers, never array payloads. Idempotent:
    /// once the store is indexed this is a no-op, and a rebuilt index is
    /// installed wholesale, never patched in place. A corrupt record aborts
    /// the scan and surfaces the error; no partial index is kept.
    pub fn ensure_index(&mut self) -> Result<&OffsetIndex, StoreError> {
        if self.index.is_none() {
            info!(
                "no precomputed index for {}; rebuilding from record headers (slow path)",
                self.path.display()
            );
            let rebuilt = self.rebuild_index()?;
            self.index = Some(Arc::new(rebuilt));
        }
        match self.index.as_deref() {
            Some(index) => Ok(index),
            None => unreachable!("index installed above"),
        }
    }

    /// Clone into an independent read handle.
    ///
    /// The clone shares the immutable index and metadata table but opens its
    /// own file descriptor, so concurrent readers never share a cursor.
    pub fn try_clone(&self) -> Result<Self, StoreError> {
        let file = open_cache_file(&self.path)?;
        Ok(Self {
            path: self.path.clone(),
            file,
            index: self.index.clone(),
            spectrum_meta: Arc::clone(&self.spectrum_meta),
        })
    }

    fn lookup(&mut self, kind: RecordKind, id: usize) -> Result<u64, StoreError> {
        let index = self.ensure_index()?;
        let (offset, len) = match kind {
            RecordKind::Spectrum => (index.spectrum_offset(id), index.spectrum_count()),
            RecordKind::Chromatogram => {
                (index.chromatogram_offset(id), index.chromatogram_count())
            }
        };
        offset.ok_or(StoreError::IndexOutOfRange {
            kind: kind.as_str(),
            id,
            len,
        })
    }

    /// Full header-only scan of the cache file.
    ///
    /// The cache format carries no kind markers, so the scan uses the
    /// metadata table to split the record sequence: the first
    /// `spectrum_meta.len()` records are spectra and the rest are
    /// chromatograms. Without a metadata table every record is indexed as a
    /// spectrum. Rebuilt ids are positions rendered as strings; native ids
    /// live only in indexes produced at build time.
    fn rebuild_index(&mut self) -> Result<OffsetIndex, StoreError> {
        use std::io::{Seek, SeekFrom};

        let end = self.file.seek(SeekFrom::End(0))?;
        let mut offsets = Vec::new();
        let mut pos = 0u64;
        while pos < end {
            offsets.push(pos);
            pos = RecordCodec::skip(&mut self.file, pos, end)?;
        }

        let spectrum_count = if self.spectrum_meta.is_empty() {
            offsets.len()
        } else {
            self.spectrum_meta.len().min(offsets.len())
        };

        let mut index = OffsetIndex::new();
        for (i, &offset) in offsets.iter().enumerate() {
            if i < spectrum_count {
                index.push_spectrum(i.to_string(), offset);
            } else {
                index.push_chromatogram((i - spectrum_count).to_string(), offset);
            }
        }
        debug!(
            "rebuilt index for {}: {} spectra, {} chromatograms",
            self.path.display(),
            index.spectrum_count(),
            index.chromatogram_count()
        );
        Ok(index)
    }
}

/// Open a cache file, optionally wiring in the precomputed index from the
/// build pass. Equivalent to [`CachedStore::open`].
pub fn open_store<P: AsRef<Path>>(
    cache_path: P,
    index: Option<OffsetIndex>,
) -> Result<CachedStore, StoreError> {
    CachedStore::open(cache_path, index)
}

fn open_cache_file(path: &Path) -> Result<File, StoreError> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::FileNotFound(path.to_path_buf())
        } else {
            StoreError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CacheBuilder;
    use crate::model::SpectrumMeta;

    fn build_test_cache(dir: &Path) -> Result<(PathBuf, OffsetIndex), Box<dyn std::error::Error>> {
        let path = dir.join("run.mzcache");
        let mut builder = CacheBuilder::create(&path)?;
        builder.append_spectrum("scan=1", &[1.0, 2.0], &[10.0, 20.0])?;
        builder.append_spectrum("scan=2", &[], &[])?;
        builder.append_spectrum("scan=3", &[3.5], &[99.9])?;
        builder.append_chromatogram("TIC", &[0.0, 1.0], &[100.0, 200.0])?;
        Ok((path.clone(), builder.finish()?))
    }

    #[test]
    fn test_get_by_positional_id() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (path, index) = build_test_cache(dir.path())?;

        let mut store = CachedStore::open(&path, Some(index))?;
        assert!(store.is_indexed());

        let s1 = store.get_spectrum(1)?;
        assert!(s1.is_empty());

        let s2 = store.get_spectrum(2)?;
        assert_eq!(s2.mz_or_rt, vec![3.5]);
        assert_eq!(s2.intensity, vec![99.9]);

        let c0 = store.get_chromatogram(0)?;
        assert_eq!(c0.mz_or_rt, vec![0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_bounds() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (path, index) = build_test_cache(dir.path())?;

        let mut store = CachedStore::open(&path, Some(index))?;
        assert!(store.get_spectrum(2).is_ok());

        let err = store.get_spectrum(3).unwrap_err();
        assert!(matches!(
            err,
            StoreError::IndexOutOfRange { kind: "spectrum", id: 3, len: 3 }
        ));
        Ok(())
    }

    #[test]
    fn test_rebuild_matches_precomputed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (path, index) = build_test_cache(dir.path())?;

        // Meta table tells the rebuild where spectra end and chromatograms begin
        let meta = vec![SpectrumMeta::default(); 3];
        let mut rebuilt = CachedStore::open(&path, None)?.with_spectrum_meta(meta);
        assert!(!rebuilt.is_indexed());
        rebuilt.ensure_index()?;
        assert!(rebuilt.is_indexed());

        let mut precomputed = CachedStore::open(&path, Some(index))?;
        for id in 0..3 {
            assert_eq!(rebuilt.get_spectrum(id)?, precomputed.get_spectrum(id)?);
        }
        assert_eq!(
            rebuilt.get_chromatogram(0)?,
            precomputed.get_chromatogram(0)?
        );
        Ok(())
    }

    #[test]
    fn test_get_triggers_implicit_indexing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (path, _) = build_test_cache(dir.path())?;

        let mut store =
            CachedStore::open(&path, None)?.with_spectrum_meta(vec![SpectrumMeta::default(); 3]);
        let s2 = store.get_spectrum(2)?;
        assert_eq!(s2.mz_or_rt, vec![3.5]);
        assert!(store.is_indexed());
        Ok(())
    }

    #[test]
    fn test_corrupt_cache_aborts_rebuild() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.mzcache");
        // Header claims far more points than the file holds
        std::fs::write(&path, 100_000u32.to_le_bytes())?;

        let mut store = CachedStore::open(&path, None)?;
        let err = store.ensure_index().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(!store.is_indexed());
        Ok(())
    }

    #[test]
    fn test_spectrum_meta_is_resident() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (path, index) = build_test_cache(dir.path())?;

        let meta = vec![
            SpectrumMeta { retention_time: 10.0, ms_level: 1 },
            SpectrumMeta { retention_time: 20.0, ms_level: 2 },
            SpectrumMeta { retention_time: 30.0, ms_level: 2 },
        ];
        let store = CachedStore::open(&path, Some(index))?.with_spectrum_meta(meta);

        assert_eq!(store.get_spectrum_meta(1)?.retention_time, 20.0);
        assert_eq!(store.get_spectrum_meta(1)?.ms_level, 2);
        assert!(matches!(
            store.get_spectrum_meta(3),
            Err(StoreError::IndexOutOfRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_clone_shares_index_but_not_cursor() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let (path, index) = build_test_cache(dir.path())?;

        let mut store = CachedStore::open(&path, Some(index))?;
        let mut clone = store.try_clone()?;
        assert!(clone.is_indexed());

        // Interleaved reads on both handles stay independent
        let a = store.get_spectrum(0)?;
        let b = clone.get_spectrum(2)?;
        let a2 = store.get_spectrum(0)?;
        assert_eq!(a, a2);
        assert_eq!(b.mz_or_rt, vec![3.5]);
        Ok(())
    }

    #[test]
    fn test_missing_cache_file() {
        let err = CachedStore::open("/no/such/cache.mzcache", None).unwrap_err();
        assert!(matches!(err, StoreError::FileNotFound(_)));
    }
}
