//! A corruption-tolerant reader for the Windows XML Event Log (EVTX)
//! binary format.
//!
//! The on-disk format is a 4 KiB file header followed by fixed 64 KiB
//! chunks, each holding a checksummed header, per-chunk string/template
//! caches, and a run of binary-XML records. This crate parses that format
//! directly from bytes, validates its structural invariants, recovers from
//! corruption at the chunk and record level, and yields decoded records as
//! XML text, JSON, or an owned structured tree.
//!
//! ```no_run
//! use evtx2json::EvtxParser;
//!
//! # fn main() -> evtx2json::err::Result<()> {
//! let mut parser = EvtxParser::from_path("Security.evtx")?;
//!
//! let mut records = parser.records_json();
//! for record in records.by_ref() {
//!     println!("{}", record.data);
//! }
//! eprintln!("{}", records.stats());
//! # Ok(())
//! # }
//! ```
//!
//! Corruption never interrupts the sequence: a chunk with a bad magic is
//! skipped at its fixed stride, a corrupt record is skipped after
//! resynchronizing on the next record magic, and everything lost is
//! counted in [`RecoveryStats`]. Only an invalid file header aborts.

pub mod binxml;
pub mod chunk;
pub mod cursor;
pub mod err;
pub mod file_header;
pub mod json_output;
pub mod model;
pub mod parser;
pub mod record;
pub mod string_cache;
pub mod template_cache;
pub mod tree_output;
mod utils;
pub mod xml_output;

/// Offsets inside a chunk are always 32-bit.
pub type ChunkOffset = u32;

pub use chunk::{EvtxChunk, EvtxChunkData, EVTX_CHUNK_HEADER_SIZE, EVTX_CHUNK_SIZE};
pub use err::{EvtxError, Result};
pub use file_header::{EvtxFileHeader, EVTX_FILE_HEADER_SIZE};
pub use json_output::JsonOutput;
pub use parser::{
    EvtxParser, IterSerializedRecords, ReadSeek, RecordSerializer, RecoveryStats,
};
pub use record::{EvtxRecord, SerializedEvtxRecord};
pub use tree_output::{TreeOutput, XmlContent, XmlNode, XmlTree};
pub use utils::format_timestamp;
pub use xml_output::{BinXmlOutput, XmlOutput};

use encoding::all::WINDOWS_1252;
use encoding::EncodingRef;
use std::fmt;

/// Knobs controlling decoding and projection. Built with a consuming
/// builder, like most of this crate's configuration:
///
/// ```
/// use evtx2json::ParserSettings;
///
/// let settings = ParserSettings::new()
///     .num_threads(1)
///     .separate_json_attributes(true);
/// ```
#[derive(Clone)]
pub struct ParserSettings {
    /// Worker count for chunk decoding; `0` lets the thread pool decide.
    num_threads: usize,
    /// When set, chunks failing checksum validation are skipped entirely
    /// instead of decoded best-effort.
    validate_checksums: bool,
    /// Emit `<name>_attributes` siblings instead of `#attributes` keys.
    separate_json_attributes: bool,
    /// Pretty-print serialized output.
    indent: bool,
    /// Codec used for ansi string values.
    ansi_codec: EncodingRef,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            num_threads: 0,
            validate_checksums: false,
            separate_json_attributes: false,
            indent: true,
            ansi_codec: WINDOWS_1252,
        }
    }
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("num_threads", &self.num_threads)
            .field("validate_checksums", &self.validate_checksums)
            .field("separate_json_attributes", &self.separate_json_attributes)
            .field("indent", &self.indent)
            .field("ansi_codec", &self.ansi_codec.name())
            .finish()
    }
}

impl PartialEq for ParserSettings {
    fn eq(&self, other: &Self) -> bool {
        self.num_threads == other.num_threads
            && self.validate_checksums == other.validate_checksums
            && self.separate_json_attributes == other.separate_json_attributes
            && self.indent == other.indent
            && self.ansi_codec.name() == other.ansi_codec.name()
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn separate_json_attributes(mut self, separate: bool) -> Self {
        self.separate_json_attributes = separate;
        self
    }

    pub fn indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn should_validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    pub fn should_separate_json_attributes(&self) -> bool {
        self.separate_json_attributes
    }

    pub fn should_indent(&self) -> bool {
        self.indent
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }
}
