//! Trailer index parser for indexed mzML containers
//!
//! Indexed mzML files carry their offset table at the end: a trailing
//! `<indexListOffset>` marker holds the byte offset of an `<indexList>`
//! block, which lists one `<offset idRef="...">` entry per spectrum and
//! chromatogram. Locating the marker needs only the file's last kilobyte and
//! parsing the block needs only the bytes between the marker's target and
//! `</indexList>`, so a lookup that would otherwise scan the whole container
//! becomes O(1) in the file size. The offsets decoded here point into the
//! original container, never into a cache file.
//!
//! A container without the trailer convention is reported as
//! [`TrailerError::IndexNotFound`]; falling back to a full scan of the
//! container is the caller's concern, not this module's.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::index::OffsetIndex;

/// Default number of trailing bytes scanned for the `<indexListOffset>` marker
pub const DEFAULT_TAIL_WINDOW: usize = 1024;

const MARKER_OPEN: &str = "<indexListOffset>";
const MARKER_CLOSE: &str = "</indexListOffset>";
const INDEX_LIST_CLOSE: &[u8] = b"</indexList>";

/// Errors from locating or parsing the trailer index
#[derive(Debug, thiserror::Error)]
pub enum TrailerError {
    /// The container file does not exist
    #[error("container file not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No trailer marker in the tail window: the container is not
    /// index-capable and the caller must fall back to a full scan
    #[error("no <indexListOffset> marker within the last {window} bytes")]
    IndexNotFound {
        /// Tail window size that was searched
        window: usize,
    },

    /// The marker or index block is present but malformed
    #[error("malformed trailer index at byte {position}: {context}")]
    Parse {
        /// Absolute byte position of the offending content
        position: u64,
        /// What was wrong with it
        context: String,
    },

    /// XML parsing error inside the index block
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Two-phase parser for the trailing offset index of an indexed mzML file
#[derive(Debug, Clone)]
pub struct TrailerParser {
    tail_window: usize,
}

impl Default for TrailerParser {
    fn default() -> Self {
        Self {
            tail_window: DEFAULT_TAIL_WINDOW,
        }
    }
}

impl TrailerParser {
    /// Create a parser with the default tail window
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tail window searched for the trailer marker.
    ///
    /// Only needed for containers written with unusually long checksum or
    /// padding content after the marker.
    pub fn with_tail_window(mut self, bytes: usize) -> Self {
        self.tail_window = bytes;
        self
    }

    /// Locate and decode the trailing offset index of the container at `path`.
    ///
    /// The returned offsets point into the container file itself.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<OffsetIndex, TrailerError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrailerError::FileNotFound(path.to_path_buf())
            } else {
                TrailerError::Io(e)
            }
        })?;

        let offset = self.locate(&mut file)?;
        debug!("trailer marker points at index list offset {offset}");

        let fragment = read_index_fragment(&mut file, offset)?;
        parse_index_fragment(&fragment, offset)
    }

    /// Phase one: find the `<indexListOffset>` marker in the file tail and
    /// return the index-list offset it carries.
    pub fn locate<R: Read + Seek>(&self, reader: &mut R) -> Result<u64, TrailerError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let read_size = std::cmp::min(self.tail_window as u64, file_size) as usize;
        reader.seek(SeekFrom::End(-(read_size as i64)))?;

        let mut tail = vec![0u8; read_size];
        reader.read_exact(&mut tail)?;
        let tail_start = file_size - read_size as u64;
        let tail_str = String::from_utf8_lossy(&tail);

        let open = tail_str.find(MARKER_OPEN).ok_or(TrailerError::IndexNotFound {
            window: self.tail_window,
        })?;
        let payload_start = open + MARKER_OPEN.len();
        let close = tail_str[payload_start..]
            .find(MARKER_CLOSE)
            .ok_or_else(|| TrailerError::Parse {
                position: tail_start + open as u64,
                context: "unterminated <indexListOffset> marker".to_string(),
            })?;

        let payload = tail_str[payload_start..payload_start + close].trim();
        let offset = payload.parse::<u64>().map_err(|_| TrailerError::Parse {
            position: tail_start + payload_start as u64,
            context: format!("index list offset {payload:?} is not a decimal integer"),
        })?;

        if offset >= file_size {
            return Err(TrailerError::Parse {
                position: tail_start + payload_start as u64,
                context: format!("index list offset {offset} points past end of file ({file_size} bytes)"),
            });
        }
        Ok(offset)
    }
}

/// Read the bytes from the located offset up to and including `</indexList>`
fn read_index_fragment<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
) -> Result<Vec<u8>, TrailerError> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let close = find_subslice(&data, INDEX_LIST_CLOSE).ok_or_else(|| TrailerError::Parse {
        position: offset,
        context: "no closing </indexList> after the located offset".to_string(),
    })?;
    data.truncate(close + INDEX_LIST_CLOSE.len());
    Ok(data)
}

/// Phase two: decode the `<indexList>` fragment into per-kind offset lists.
///
/// The fragment is parsed in isolation (it is not a complete XML document),
/// so the reader runs in a permissive, non-namespace-aware mode. `base` is
/// the fragment's absolute position in the container, used for error context.
fn parse_index_fragment(data: &[u8], base: u64) -> Result<OffsetIndex, TrailerError> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut index = OffsetIndex::new();
    let mut current_kind: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"index" => {
                    current_kind = get_attribute(e, "name")?;
                }
                b"offset" => {
                    let id = get_attribute(e, "idRef")?.unwrap_or_default();
                    let position = base + reader.buffer_position() as u64;

                    let mut text_buf = Vec::new();
                    let text = match reader.read_event_into(&mut text_buf) {
                        Ok(Event::Text(t)) => t.unescape()?.trim().to_string(),
                        Ok(_) => String::new(),
                        Err(e) => return Err(TrailerError::Xml(e)),
                    };
                    let offset = text.parse::<u64>().map_err(|_| TrailerError::Parse {
                        position,
                        context: format!("offset for id {id:?} is not a decimal integer: {text:?}"),
                    })?;

                    match current_kind.as_deref() {
                        Some("spectrum") => index.push_spectrum(id, offset),
                        Some("chromatogram") => index.push_chromatogram(id, offset),
                        // Other index kinds are legal mzML; this layer has no use for them
                        _ => {}
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"index" {
                    current_kind = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(TrailerError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(index)
}

fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<String>, TrailerError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| TrailerError::Xml(quick_xml::Error::from(e)))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
