//! Binary data array decoding for mzML
//!
//! mzML stores numerical arrays as Base64-encoded binary, optionally zlib
//! compressed. Decoding is a three-step pipeline:
//!
//! 1. Base64 decode the element text
//! 2. Decompress if needed
//! 3. Interpret the bytes as little-endian float32 or float64

use std::io::{Cursor, Read};

use base64::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

/// Numerical precision of an encoded array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayEncoding {
    /// 32-bit floating point (MS:1000521)
    Float32,
    /// 64-bit floating point (MS:1000523)
    #[default]
    Float64,
}

impl ArrayEncoding {
    /// Determine encoding from a CV accession
    pub fn from_cv_accession(accession: &str) -> Option<Self> {
        match accession {
            "MS:1000521" => Some(ArrayEncoding::Float32),
            "MS:1000523" => Some(ArrayEncoding::Float64),
            _ => None,
        }
    }

    /// Byte size per encoded value
    pub fn byte_size(&self) -> usize {
        match self {
            ArrayEncoding::Float32 => 4,
            ArrayEncoding::Float64 => 8,
        }
    }
}

/// Compression applied to an encoded array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayCompression {
    /// No compression (MS:1000576)
    #[default]
    None,
    /// zlib compression (MS:1000574)
    Zlib,
    /// MS-Numpress linear prediction (MS:1002312)
    NumpressLinear,
    /// MS-Numpress positive integer (MS:1002313)
    NumpressPic,
    /// MS-Numpress short logged float (MS:1002314)
    NumpressSlof,
}

impl ArrayCompression {
    /// Determine compression from a CV accession
    pub fn from_cv_accession(accession: &str) -> Option<Self> {
        match accession {
            "MS:1000574" => Some(ArrayCompression::Zlib),
            "MS:1000576" => Some(ArrayCompression::None),
            "MS:1002312" => Some(ArrayCompression::NumpressLinear),
            "MS:1002313" => Some(ArrayCompression::NumpressPic),
            "MS:1002314" => Some(ArrayCompression::NumpressSlof),
            _ => None,
        }
    }
}

/// Errors from decoding an mzML binary array
#[derive(Debug, thiserror::Error)]
pub enum BinaryDecodeError {
    /// Base64 decode error
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// zlib decompression error
    #[error("decompression error: {0}")]
    Decompression(#[from] std::io::Error),

    /// Decoded value count disagrees with the declared array length
    #[error("invalid array length: expected {expected} values, got {actual}")]
    InvalidLength {
        /// Declared value count
        expected: usize,
        /// Decoded value count
        actual: usize,
    },

    /// Byte count is not a multiple of the value size
    #[error("binary payload of {bytes} bytes is not a multiple of {value_size}-byte values")]
    MisalignedPayload {
        /// Payload byte count after decompression
        bytes: usize,
        /// Encoded value size
        value_size: usize,
    },

    /// Compression scheme this reader does not implement
    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(ArrayCompression),
}

/// Decoder for mzML binary data arrays
pub struct BinaryDecoder;

impl BinaryDecoder {
    /// Decode one Base64-encoded binary array to f64 values.
    ///
    /// An empty or whitespace-only payload decodes to an empty array; mzML
    /// writes empty `<binary>` elements for spectra with no data points.
    /// When `expected_length` is given (from `defaultArrayLength`), a count
    /// mismatch is an error rather than a silently short array.
    pub fn decode(
        base64_data: &str,
        encoding: ArrayEncoding,
        compression: ArrayCompression,
        expected_length: Option<usize>,
    ) -> Result<Vec<f64>, BinaryDecodeError> {
        let trimmed = base64_data.trim();
        if trimmed.is_empty() {
            return match expected_length {
                Some(expected) if expected > 0 => Err(BinaryDecodeError::InvalidLength {
                    expected,
                    actual: 0,
                }),
                _ => Ok(Vec::new()),
            };
        }

        let decoded = BASE64_STANDARD.decode(trimmed)?;

        let raw = match compression {
            ArrayCompression::None => decoded,
            ArrayCompression::Zlib => {
                let mut decoder = ZlibDecoder::new(&decoded[..]);
                let mut raw = Vec::new();
                decoder.read_to_end(&mut raw)?;
                raw
            }
            ArrayCompression::NumpressLinear
            | ArrayCompression::NumpressPic
            | ArrayCompression::NumpressSlof => {
                return Err(BinaryDecodeError::UnsupportedCompression(compression));
            }
        };

        let values = Self::bytes_to_floats(&raw, encoding)?;

        if let Some(expected) = expected_length {
            if values.len() != expected {
                return Err(BinaryDecodeError::InvalidLength {
                    expected,
                    actual: values.len(),
                });
            }
        }
        Ok(values)
    }

    fn bytes_to_floats(
        bytes: &[u8],
        encoding: ArrayEncoding,
    ) -> Result<Vec<f64>, BinaryDecodeError> {
        let value_size = encoding.byte_size();
        if bytes.len() % value_size != 0 {
            return Err(BinaryDecodeError::MisalignedPayload {
                bytes: bytes.len(),
                value_size,
            });
        }
        let count = bytes.len() / value_size;
        let mut cursor = Cursor::new(bytes);

        match encoding {
            ArrayEncoding::Float64 => {
                let mut values = vec![0f64; count];
                cursor.read_f64_into::<LittleEndian>(&mut values)?;
                Ok(values)
            }
            ArrayEncoding::Float32 => {
                let mut narrow = vec![0f32; count];
                cursor.read_f32_into::<LittleEndian>(&mut narrow)?;
                Ok(narrow.into_iter().map(f64::from).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;

    fn encode_f64(values: &[f64]) -> String {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        BASE64_STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_float64_uncompressed() -> Result<(), BinaryDecodeError> {
        let data = encode_f64(&[100.5, 200.25, 300.125]);
        let values = BinaryDecoder::decode(
            &data,
            ArrayEncoding::Float64,
            ArrayCompression::None,
            Some(3),
        )?;
        assert_eq!(values, vec![100.5, 200.25, 300.125]);
        Ok(())
    }

    #[test]
    fn test_decode_float32() -> Result<(), BinaryDecodeError> {
        let mut bytes = Vec::new();
        for v in [1.5f32, 2.5f32] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let data = BASE64_STANDARD.encode(bytes);
        let values =
            BinaryDecoder::decode(&data, ArrayEncoding::Float32, ArrayCompression::None, None)?;
        assert_eq!(values, vec![1.5, 2.5]);
        Ok(())
    }

    #[test]
    fn test_decode_zlib() -> Result<(), Box<dyn std::error::Error>> {
        let mut raw = Vec::new();
        for v in [42.0f64, 43.0f64] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let data = BASE64_STANDARD.encode(encoder.finish()?);

        let values = BinaryDecoder::decode(
            &data,
            ArrayEncoding::Float64,
            ArrayCompression::Zlib,
            Some(2),
        )?;
        assert_eq!(values, vec![42.0, 43.0]);
        Ok(())
    }

    #[test]
    fn test_empty_payload_decodes_to_empty_array() -> Result<(), BinaryDecodeError> {
        let values =
            BinaryDecoder::decode("", ArrayEncoding::Float64, ArrayCompression::None, Some(0))?;
        assert!(values.is_empty());
        Ok(())
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let data = encode_f64(&[1.0]);
        let err = BinaryDecoder::decode(
            &data,
            ArrayEncoding::Float64,
            ArrayCompression::None,
            Some(5),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BinaryDecodeError::InvalidLength { expected: 5, actual: 1 }
        ));
    }

    #[test]
    fn test_numpress_is_unsupported() {
        let data = encode_f64(&[1.0]);
        let err = BinaryDecoder::decode(
            &data,
            ArrayEncoding::Float64,
            ArrayCompression::NumpressLinear,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BinaryDecodeError::UnsupportedCompression(_)));
    }
}
