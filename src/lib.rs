//! # mzCache - Random-Access Storage for Large MS Runs
//!
//! `mzcache` makes single-spectrum and single-chromatogram lookup cheap for
//! very large mzML runs. Loading tens of thousands of spectra to access one
//! of them is prohibitive; this crate turns that lookup into a single seek.
//!
//! ## Two complementary mechanisms
//!
//! - **Trailer index parsing**: indexed mzML files end with an offset table.
//!   [`TrailerParser`](trailer::TrailerParser) locates it by scanning only
//!   the file's last kilobyte and decodes it without reading the container
//!   body, yielding container-side byte offsets per spectrum/chromatogram.
//!
//! - **Binary cache files**: [`build_cache`] streams a container once into a
//!   compact binary file of raw f64 arrays, and [`CachedStore`](store::CachedStore)
//!   serves any record from it by positional id with one seek and one decode,
//!   independent of total file size.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mzcache::{build_cache, open_store};
//!
//! // One-time conversion of the verbose container
//! let built = build_cache("run.mzML", "run.mzcache")?;
//!
//! // Any number of later opens; pass the index to skip the rebuild scan
//! let mut store = open_store("run.mzcache", Some(built.index))?
//!     .with_spectrum_meta(built.spectrum_meta);
//!
//! let meta = store.get_spectrum_meta(42)?;
//! if meta.ms_level == 2 {
//!     let record = store.get_spectrum(42)?;
//!     println!("{} peaks at RT {:.1}s", record.len(), meta.retention_time);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Cache file format
//!
//! The cache is a concatenation of records, spectra first, then
//! chromatograms:
//!
//! ```text
//! u32 (LE)  n       data point count
//! f64 (LE)  × n     m/z or retention time
//! f64 (LE)  × n     intensity
//! ```
//!
//! Values are stored as raw IEEE-754 doubles, so round-trips are bit-exact.
//! The offset index produced at build time maps positional ids to record
//! offsets; it can be persisted as JSON ([`OffsetIndex::save_json`](index::OffsetIndex::save_json))
//! or rebuilt from record headers via
//! [`CachedStore::ensure_index`](store::CachedStore::ensure_index).
//!
//! ## Concurrency
//!
//! All I/O is synchronous and blocking. A built index is immutable and
//! shared between store clones; each clone owns its own file descriptor
//! ([`CachedStore::try_clone`](store::CachedStore::try_clone)), so readers
//! never share a file cursor. Index before cloning.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod codec;
pub mod index;
pub mod model;
pub mod mzml;
pub mod store;
pub mod trailer;

pub use builder::{build_cache, BuildOutput};
pub use store::open_store;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::builder::{build_cache, BuildOutput, BuilderError, CacheBuilder};
    pub use crate::codec::{CodecError, RecordCodec};
    pub use crate::index::{IndexError, OffsetEntry, OffsetIndex};
    pub use crate::model::{Record, RecordKind, SpectrumMeta};
    pub use crate::mzml::{MzmlError, RecordStreamer, SourceChromatogram, SourceSpectrum};
    pub use crate::store::{open_store, CachedStore, StoreError};
    pub use crate::trailer::{TrailerError, TrailerParser, DEFAULT_TAIL_WINDOW};
}
