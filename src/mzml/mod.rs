//! Minimal streaming record source for mzML containers
//!
//! The cache builder needs the container's records one at a time, never the
//! whole file in memory. This module pull-parses `<spectrum>` and
//! `<chromatogram>` elements and extracts only what the cache layer stores:
//! the two binary data arrays, plus the retention time and MS level that feed
//! the resident metadata table.
//!
//! It is deliberately not a full mzML object model: precursors, instrument
//! configuration, and CV metadata preservation are out of scope and stay with
//! richer readers.

mod binary;
mod streamer;

pub use binary::{ArrayCompression, ArrayEncoding, BinaryDecodeError, BinaryDecoder};
pub use streamer::{RecordStreamer, SourceChromatogram, SourceSpectrum};

/// Errors from streaming records out of an mzML container
#[derive(Debug, thiserror::Error)]
pub enum MzmlError {
    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary array decode error
    #[error("binary decode error: {0}")]
    Binary(#[from] BinaryDecodeError),

    /// The document deviates from the mzML structure this reader relies on
    #[error("invalid mzML structure: {0}")]
    InvalidStructure(String),

    /// UTF-8 encoding error
    #[error("UTF-8 encoding error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}
