//! Binary record codec for the cache file
//!
//! On-disk layout of one record:
//!
//! ```text
//! u32 (LE)   n        number of data points
//! f64 (LE)   × n      first array  (m/z or retention time)
//! f64 (LE)   × n      second array (intensity)
//! ```
//!
//! The length prefix makes every record self-describing: a reader positioned
//! at a record boundary can decode it, or skip it by reading only the header.
//! The codec knows nothing about files or indices; it operates on any
//! seekable byte stream.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::model::Record;

/// Size of the record length prefix in bytes
pub const HEADER_SIZE: u64 = 4;

/// Size of one f64 data point in bytes (two arrays)
const POINT_SIZE: u64 = 16;

/// Errors from encoding or decoding a cache record
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The two arrays of a record differ in length (programmer error)
    #[error("array length mismatch: {mz_len} m/z values vs {intensity_len} intensities")]
    LengthMismatch {
        /// Length of the first array
        mz_len: usize,
        /// Length of the second array
        intensity_len: usize,
    },

    /// Record length exceeds the u32 prefix
    #[error("record too large: {0} data points exceed the u32 length prefix")]
    TooManyPoints(usize),

    /// Declared record length exceeds the remaining file size
    #[error("corrupt record at offset {offset}: {declared} points declared but only {available} bytes remain")]
    CorruptRecord {
        /// Byte offset of the record start
        offset: u64,
        /// Declared number of data points
        declared: u32,
        /// Bytes remaining after the length prefix
        available: u64,
    },

    /// Fewer than four bytes remain where a record header was expected
    #[error("truncated record header at offset {offset}: only {available} bytes remain")]
    TruncatedHeader {
        /// Byte offset of the expected record start
        offset: u64,
        /// Bytes remaining at that offset
        available: u64,
    },
}

/// Encoder/decoder for cache records
pub struct RecordCodec;

impl RecordCodec {
    /// Write one record at the stream's current position.
    ///
    /// Returns the byte offset the record was written at, which the caller
    /// records into its offset index. The arrays must have equal length;
    /// violating that is a programmer error and fails fast, never truncates.
    pub fn write<W: Write + Seek>(
        writer: &mut W,
        mz: &[f64],
        intensity: &[f64],
    ) -> Result<u64, CodecError> {
        if mz.len() != intensity.len() {
            return Err(CodecError::LengthMismatch {
                mz_len: mz.len(),
                intensity_len: intensity.len(),
            });
        }
        let n = u32::try_from(mz.len()).map_err(|_| CodecError::TooManyPoints(mz.len()))?;

        let offset = writer.stream_position()?;
        writer.write_u32::<LittleEndian>(n)?;
        for &value in mz {
            writer.write_f64::<LittleEndian>(value)?;
        }
        for &value in intensity {
            writer.write_f64::<LittleEndian>(value)?;
        }
        Ok(offset)
    }

    /// Read the record starting at `offset`.
    ///
    /// The declared length is validated against the remaining file size
    /// before any allocation, so a truncated or corrupt file fails with
    /// [`CodecError::CorruptRecord`] instead of over-reading.
    pub fn read<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Record, CodecError> {
        let end = reader.seek(SeekFrom::End(0))?;
        let n = Self::read_header(reader, offset, end)?;

        let mut mz = vec![0f64; n as usize];
        reader.read_f64_into::<LittleEndian>(&mut mz)?;
        let mut intensity = vec![0f64; n as usize];
        reader.read_f64_into::<LittleEndian>(&mut intensity)?;

        Ok(Record { mz_or_rt: mz, intensity })
    }

    /// Validate the record at `offset` and return the offset just past it.
    ///
    /// Reads only the length prefix, never the payload; this is the primitive
    /// behind the store's header-only index rebuild scan. `end` is the total
    /// stream length, computed once by the caller.
    pub fn skip<R: Read + Seek>(
        reader: &mut R,
        offset: u64,
        end: u64,
    ) -> Result<u64, CodecError> {
        let n = Self::read_header(reader, offset, end)?;
        let next = offset + HEADER_SIZE + u64::from(n) * POINT_SIZE;
        reader.seek(SeekFrom::Start(next))?;
        Ok(next)
    }

    /// Seek to `offset`, read the length prefix, and bounds-check it
    fn read_header<R: Read + Seek>(
        reader: &mut R,
        offset: u64,
        end: u64,
    ) -> Result<u32, CodecError> {
        if offset + HEADER_SIZE > end {
            return Err(CodecError::TruncatedHeader {
                offset,
                available: end.saturating_sub(offset),
            });
        }
        reader.seek(SeekFrom::Start(offset))?;
        let n = reader.read_u32::<LittleEndian>()?;

        let available = end - offset - HEADER_SIZE;
        if u64::from(n) * POINT_SIZE > available {
            return Err(CodecError::CorruptRecord {
                offset,
                declared: n,
                available,
            });
        }
        Ok(n)
    }
}
