//! Pull-based record streamer for mzML files
//!
//! Yields one record at a time so the cache builder can process arbitrarily
//! large containers in a single bounded-memory pass. mzML puts the
//! `spectrumList` before the `chromatogramList`, and this reader follows the
//! document order: drain [`next_spectrum`](RecordStreamer::next_spectrum)
//! first, then [`next_chromatogram`](RecordStreamer::next_chromatogram).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::binary::{ArrayCompression, ArrayEncoding, BinaryDecoder};
use super::MzmlError;
use crate::model::{Record, SpectrumMeta};

/// Default input buffer size for mzML parsing (64KB)
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 64 * 1024;

const CV_MS_LEVEL: &str = "MS:1000511";
const CV_SCAN_START_TIME: &str = "MS:1000016";
const CV_MZ_ARRAY: &str = "MS:1000514";
const CV_INTENSITY_ARRAY: &str = "MS:1000515";
const CV_TIME_ARRAY: &str = "MS:1000595";
const CV_UNIT_MINUTE: &str = "UO:0000031";
const CV_UNIT_MILLISECOND: &str = "UO:0000028";

/// One spectrum pulled from the container
#[derive(Debug, Clone)]
pub struct SourceSpectrum {
    /// Native spectrum id from the `id` attribute
    pub id: String,
    /// m/z and intensity arrays
    pub record: Record,
    /// Retention time and MS level for the resident metadata table
    pub meta: SpectrumMeta,
}

/// One chromatogram pulled from the container
#[derive(Debug, Clone)]
pub struct SourceChromatogram {
    /// Native chromatogram id from the `id` attribute
    pub id: String,
    /// Time and intensity arrays
    pub record: Record,
}

/// The slice of a cvParam element this reader needs
struct CvParam {
    accession: String,
    value: Option<String>,
    unit_accession: Option<String>,
}

/// Semantic role of a binary data array, from its cvParam terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayRole {
    Mz,
    Intensity,
    Time,
}

struct DecodedArray {
    role: Option<ArrayRole>,
    values: Vec<f64>,
}

struct ParsedElement {
    id: String,
    cv_params: Vec<CvParam>,
    arrays: Vec<DecodedArray>,
}

/// Streaming reader yielding spectra and chromatograms one at a time
pub struct RecordStreamer<R: BufRead> {
    reader: Reader<R>,
    element_buf: Vec<u8>,
    spectrum_index: usize,
    chromatogram_index: usize,
    spectra_done: bool,
}

impl RecordStreamer<BufReader<File>> {
    /// Open an mzML file for streaming with the default buffer size
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MzmlError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::with_capacity(
            DEFAULT_INPUT_BUFFER_SIZE,
            file,
        )))
    }
}

impl<R: BufRead> RecordStreamer<R> {
    /// Wrap an already-open reader
    pub fn new(reader: R) -> Self {
        let mut xml = Reader::from_reader(reader);
        xml.config_mut().trim_text(true);
        Self {
            reader: xml,
            element_buf: Vec::new(),
            spectrum_index: 0,
            chromatogram_index: 0,
            spectra_done: false,
        }
    }

    /// Read the next spectrum, or `None` once the spectrum list is exhausted
    pub fn next_spectrum(&mut self) -> Result<Option<SourceSpectrum>, MzmlError> {
        if self.spectra_done {
            return Ok(None);
        }
        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => match e.name().as_ref() {
                    b"spectrum" => {
                        let start = e.to_owned();
                        let parsed = self.parse_record_element(&start, self.spectrum_index)?;
                        self.spectrum_index += 1;

                        let meta = extract_meta(&parsed.cv_params);
                        let record =
                            assemble_record(parsed.arrays, ArrayRole::Mz, &parsed.id)?;
                        return Ok(Some(SourceSpectrum {
                            id: parsed.id,
                            record,
                            meta,
                        }));
                    }
                    b"chromatogramList" => {
                        // Past the spectra without seeing </spectrumList>
                        self.spectra_done = true;
                        return Ok(None);
                    }
                    _ => {}
                },
                Ok(Event::End(ref e)) if e.name().as_ref() == b"spectrumList" => {
                    self.spectra_done = true;
                    return Ok(None);
                }
                Ok(Event::Eof) => {
                    self.spectra_done = true;
                    return Ok(None);
                }
                Err(e) => return Err(MzmlError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }
    }

    /// Read the next chromatogram, or `None` once the list is exhausted.
    ///
    /// Must be called only after the spectra have been drained; the reader
    /// moves strictly forward through the document.
    pub fn next_chromatogram(&mut self) -> Result<Option<SourceChromatogram>, MzmlError> {
        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    if e.name().as_ref() == b"chromatogram" {
                        let start = e.to_owned();
                        let parsed =
                            self.parse_record_element(&start, self.chromatogram_index)?;
                        self.chromatogram_index += 1;

                        let record =
                            assemble_record(parsed.arrays, ArrayRole::Time, &parsed.id)?;
                        return Ok(Some(SourceChromatogram {
                            id: parsed.id,
                            record,
                        }));
                    }
                }
                Ok(Event::End(ref e)) if e.name().as_ref() == b"chromatogramList" => {
                    return Ok(None);
                }
                Ok(Event::Eof) => return Ok(None),
                Err(e) => return Err(MzmlError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }
    }

    /// Parse one `<spectrum>` or `<chromatogram>` element to its id, cvParams
    /// and decoded binary arrays. The reader is positioned just past the
    /// element's start tag; on return it is just past the end tag.
    fn parse_record_element(
        &mut self,
        start: &BytesStart,
        fallback_index: usize,
    ) -> Result<ParsedElement, MzmlError> {
        let id = get_attribute(start, "id")?.unwrap_or_else(|| fallback_index.to_string());
        let default_length: Option<usize> =
            get_attribute(start, "defaultArrayLength")?.and_then(|s| s.parse().ok());

        let mut cv_params = Vec::new();
        let mut arrays = Vec::new();

        let mut depth = 1usize;
        let mut in_array = false;
        let mut in_binary = false;
        let mut array_params: Vec<CvParam> = Vec::new();
        let mut base64_data = String::new();

        loop {
            self.element_buf.clear();
            match self.reader.read_event_into(&mut self.element_buf) {
                Ok(Event::Start(ref e)) => {
                    depth += 1;
                    match e.name().as_ref() {
                        b"binaryDataArray" => {
                            in_array = true;
                            array_params.clear();
                            base64_data.clear();
                        }
                        b"binary" => in_binary = true,
                        b"cvParam" => {
                            let param = parse_cv_param(e)?;
                            if in_array {
                                array_params.push(param);
                            } else {
                                cv_params.push(param);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                    b"cvParam" => {
                        let param = parse_cv_param(e)?;
                        if in_array {
                            array_params.push(param);
                        } else {
                            cv_params.push(param);
                        }
                    }
                    b"binary" => {
                        // Empty <binary/>: a zero-point array
                    }
                    _ => {}
                },
                Ok(Event::Text(ref t)) => {
                    if in_binary {
                        base64_data.push_str(&t.unescape()?);
                    }
                }
                Ok(Event::End(ref e)) => {
                    match e.name().as_ref() {
                        b"binary" => in_binary = false,
                        b"binaryDataArray" => {
                            in_array = false;
                            arrays.push(decode_array(
                                &array_params,
                                &base64_data,
                                default_length,
                            )?);
                        }
                        _ => {}
                    }
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Ok(Event::Eof) => {
                    return Err(MzmlError::InvalidStructure(format!(
                        "unexpected end of file inside element {id:?}"
                    )));
                }
                Err(e) => return Err(MzmlError::Xml(e)),
                _ => {}
            }
        }

        Ok(ParsedElement {
            id,
            cv_params,
            arrays,
        })
    }
}

/// Decode one binaryDataArray from its cvParams and Base64 payload.
///
/// Arrays without a recognized role term are still decoded and kept as
/// untagged candidates for the positional fallback in [`assemble_record`].
fn decode_array(
    params: &[CvParam],
    base64_data: &str,
    default_length: Option<usize>,
) -> Result<DecodedArray, MzmlError> {
    let mut encoding = ArrayEncoding::default();
    let mut compression = ArrayCompression::default();
    let mut role = None;

    for param in params {
        if let Some(e) = ArrayEncoding::from_cv_accession(&param.accession) {
            encoding = e;
        } else if let Some(c) = ArrayCompression::from_cv_accession(&param.accession) {
            compression = c;
        } else {
            role = role.or(match param.accession.as_str() {
                CV_MZ_ARRAY => Some(ArrayRole::Mz),
                CV_INTENSITY_ARRAY => Some(ArrayRole::Intensity),
                CV_TIME_ARRAY => Some(ArrayRole::Time),
                _ => None,
            });
        }
    }

    // defaultArrayLength binds the m/z, time and intensity arrays; auxiliary
    // arrays may legally carry their own length, so skip the check for them
    let expected = if role.is_some() { default_length } else { None };

    let values = BinaryDecoder::decode(base64_data, encoding, compression, expected)?;
    Ok(DecodedArray { role, values })
}

/// Pair the decoded arrays into a [`Record`], preferring role terms and
/// falling back to document order for writers that omit them
fn assemble_record(
    arrays: Vec<DecodedArray>,
    axis_role: ArrayRole,
    id: &str,
) -> Result<Record, MzmlError> {
    if arrays.is_empty() {
        return Ok(Record::default());
    }

    let mut axis: Option<Vec<f64>> = None;
    let mut intensity: Option<Vec<f64>> = None;
    let mut untagged: Vec<Vec<f64>> = Vec::new();

    for array in arrays {
        match array.role {
            Some(role) if role == axis_role => axis = Some(array.values),
            Some(ArrayRole::Intensity) => intensity = Some(array.values),
            _ => untagged.push(array.values),
        }
    }

    let mut untagged = untagged.into_iter();
    let axis = match axis {
        Some(values) => values,
        None => untagged.next().ok_or_else(|| {
            MzmlError::InvalidStructure(format!("element {id:?} has no axis array"))
        })?,
    };
    let intensity = match intensity {
        Some(values) => values,
        None => untagged.next().ok_or_else(|| {
            MzmlError::InvalidStructure(format!("element {id:?} has no intensity array"))
        })?,
    };

    Record::new(axis, intensity).ok_or_else(|| {
        MzmlError::InvalidStructure(format!("element {id:?} has arrays of unequal length"))
    })
}

/// Extract the resident metadata fields from element-level cvParams
fn extract_meta(params: &[CvParam]) -> SpectrumMeta {
    let ms_level = params
        .iter()
        .find(|p| p.accession == CV_MS_LEVEL)
        .and_then(|p| p.value.as_deref())
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(1);

    let retention_time = params
        .iter()
        .find(|p| p.accession == CV_SCAN_START_TIME)
        .and_then(|p| {
            let value = p.value.as_deref()?.parse::<f64>().ok()?;
            Some(normalize_retention_time(value, p.unit_accession.as_deref()))
        })
        .unwrap_or(0.0);

    SpectrumMeta {
        retention_time,
        ms_level,
    }
}

/// Normalize a scan start time to seconds based on its unit accession
fn normalize_retention_time(value: f64, unit_accession: Option<&str>) -> f64 {
    match unit_accession {
        Some(CV_UNIT_MINUTE) => value * 60.0,
        Some(CV_UNIT_MILLISECOND) => value / 1000.0,
        _ => value,
    }
}

fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<String>, MzmlError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| MzmlError::Xml(quick_xml::Error::from(e)))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = std::str::from_utf8(&attr.value)?.to_string();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn parse_cv_param(e: &BytesStart) -> Result<CvParam, MzmlError> {
    Ok(CvParam {
        accession: get_attribute(e, "accession")?.unwrap_or_default(),
        value: get_attribute(e, "value")?,
        unit_accession: get_attribute(e, "unitAccession")?,
    })
}

#[cfg(test)]
mod tests {
    use base64::prelude::*;

    use super::*;

    fn b64(values: &[f64]) -> String {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        BASE64_STANDARD.encode(bytes)
    }

    fn binary_array(role_accession: &str, role_name: &str, values: &[f64]) -> String {
        format!(
            "<binaryDataArray encodedLength=\"0\">\
             <cvParam cvRef=\"MS\" accession=\"MS:1000523\" name=\"64-bit float\"/>\
             <cvParam cvRef=\"MS\" accession=\"MS:1000576\" name=\"no compression\"/>\
             <cvParam cvRef=\"MS\" accession=\"{role_accession}\" name=\"{role_name}\"/>\
             <binary>{}</binary>\
             </binaryDataArray>",
            b64(values)
        )
    }

    fn test_document() -> String {
        let mut doc = String::from("<mzML><run id=\"r\"><spectrumList count=\"2\">");
        doc.push_str(&format!(
            "<spectrum index=\"0\" id=\"scan=1\" defaultArrayLength=\"2\">\
             <cvParam cvRef=\"MS\" accession=\"MS:1000511\" name=\"ms level\" value=\"1\"/>\
             <scanList count=\"1\"><scan>\
             <cvParam cvRef=\"MS\" accession=\"MS:1000016\" name=\"scan start time\" value=\"0.5\" unitAccession=\"UO:0000031\" unitName=\"minute\"/>\
             </scan></scanList>\
             <binaryDataArrayList count=\"2\">{}{}</binaryDataArrayList>\
             </spectrum>",
            binary_array("MS:1000514", "m/z array", &[400.0, 500.0]),
            binary_array("MS:1000515", "intensity array", &[10.0, 20.0]),
        ));
        doc.push_str(
            "<spectrum index=\"1\" id=\"scan=2\" defaultArrayLength=\"0\">\
             <cvParam cvRef=\"MS\" accession=\"MS:1000511\" name=\"ms level\" value=\"2\"/>\
             <binaryDataArrayList count=\"2\">\
             <binaryDataArray><cvParam cvRef=\"MS\" accession=\"MS:1000523\" name=\"64-bit float\"/>\
             <cvParam cvRef=\"MS\" accession=\"MS:1000514\" name=\"m/z array\"/>\
             <binary></binary></binaryDataArray>\
             <binaryDataArray><cvParam cvRef=\"MS\" accession=\"MS:1000523\" name=\"64-bit float\"/>\
             <cvParam cvRef=\"MS\" accession=\"MS:1000515\" name=\"intensity array\"/>\
             <binary></binary></binaryDataArray>\
             </binaryDataArrayList></spectrum>",
        );
        doc.push_str("</spectrumList><chromatogramList count=\"1\">");
        doc.push_str(&format!(
            "<chromatogram index=\"0\" id=\"TIC\" defaultArrayLength=\"3\">\
             <binaryDataArrayList count=\"2\">{}{}</binaryDataArrayList>\
             </chromatogram>",
            binary_array("MS:1000595", "time array", &[1.0, 2.0, 3.0]),
            binary_array("MS:1000515", "intensity array", &[5.0, 6.0, 7.0]),
        ));
        doc.push_str("</chromatogramList></run></mzML>");
        doc
    }

    #[test]
    fn test_stream_spectra_then_chromatograms() -> Result<(), MzmlError> {
        let doc = test_document();
        let mut streamer = RecordStreamer::new(doc.as_bytes());

        let s1 = streamer.next_spectrum()?.expect("first spectrum");
        assert_eq!(s1.id, "scan=1");
        assert_eq!(s1.record.mz_or_rt, vec![400.0, 500.0]);
        assert_eq!(s1.record.intensity, vec![10.0, 20.0]);
        assert_eq!(s1.meta.ms_level, 1);
        // 0.5 min normalized to seconds
        assert!((s1.meta.retention_time - 30.0).abs() < 1e-9);

        let s2 = streamer.next_spectrum()?.expect("second spectrum");
        assert_eq!(s2.id, "scan=2");
        assert!(s2.record.is_empty());
        assert_eq!(s2.meta.ms_level, 2);

        assert!(streamer.next_spectrum()?.is_none());
        // Idempotent after exhaustion
        assert!(streamer.next_spectrum()?.is_none());

        let c = streamer.next_chromatogram()?.expect("chromatogram");
        assert_eq!(c.id, "TIC");
        assert_eq!(c.record.mz_or_rt, vec![1.0, 2.0, 3.0]);
        assert_eq!(c.record.intensity, vec![5.0, 6.0, 7.0]);

        assert!(streamer.next_chromatogram()?.is_none());
        Ok(())
    }

    #[test]
    fn test_unequal_arrays_are_invalid_structure() {
        let doc = format!(
            "<mzML><run><spectrumList count=\"1\">\
             <spectrum id=\"scan=1\">\
             <binaryDataArrayList count=\"2\">{}{}</binaryDataArrayList>\
             </spectrum></spectrumList></run></mzML>",
            binary_array("MS:1000514", "m/z array", &[1.0, 2.0]),
            binary_array("MS:1000515", "intensity array", &[9.0]),
        );
        let mut streamer = RecordStreamer::new(doc.as_bytes());
        let err = streamer.next_spectrum().unwrap_err();
        assert!(matches!(err, MzmlError::InvalidStructure(_)));
    }

    #[test]
    fn test_retention_time_units() {
        assert_eq!(normalize_retention_time(2.0, Some(CV_UNIT_MINUTE)), 120.0);
        assert_eq!(
            normalize_retention_time(1500.0, Some(CV_UNIT_MILLISECOND)),
            1.5
        );
        assert_eq!(normalize_retention_time(45.0, None), 45.0);
    }
}
