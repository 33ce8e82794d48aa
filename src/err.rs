use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;
pub type SerializationResult<T> = std::result::Result<T, SerializationError>;

/// File-level errors, and the top-level error type of the crate.
///
/// Anything chunk- or record-scoped is recovered internally and surfaced
/// through [`crate::RecoveryStats`]; only errors that make the whole file
/// unreadable propagate as `EvtxError`.
#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("not an EVTX file: expected file header magic `ElfFile\\x00`, found `{magic:02x?}`")]
    InvalidFileFormat { magic: [u8; 8] },

    #[error("reached EOF while reading the 4096-byte file header")]
    IncompleteFileHeader,

    #[error("failed to open file {}", path.display())]
    FailedToOpenFile {
        source: io::Error,
        path: PathBuf,
    },

    #[error("an I/O error has occurred")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Chunk- and record-level decoding errors.
///
/// These never abort iteration: the chunk walker either skips the chunk
/// (bad magic) or resynchronizes to the next record magic, counting what
/// was lost.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("invalid EVTX chunk header magic, expected `ElfChnk\\x00`, found `{magic:02x?}`")]
    BadChunkMagic { magic: [u8; 8] },

    #[error(
        "offset {offset}: invalid EVTX record header magic, expected `2a2a0000`, found `{magic:02x?}`"
    )]
    BadRecordMagic { magic: [u8; 4], offset: u64 },

    #[error(
        "offset {offset}: record trailing size copy `{trailing}` does not match header size `{declared}`"
    )]
    SizeMismatch {
        declared: u32,
        trailing: u32,
        offset: u64,
    },

    #[error("offset {offset}: record size {size} cannot fit inside its chunk")]
    ImplausibleRecordSize { size: u32, offset: u64 },

    #[error("offset {offset}: needed {need} byte(s) to read {what}, only {have} available")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("offset {offset}: `{value:#04x}` is not a valid binxml token")]
    InvalidToken { value: u8, offset: u64 },

    #[error("offset {offset}: `{value:#04x}` is not a valid binxml value type")]
    InvalidValueVariant { value: u8, offset: u64 },

    #[error("offset {offset}: binxml token `{name}` is unimplemented")]
    UnimplementedToken { name: &'static str, offset: u64 },

    #[error("offset {offset}: template definitions nest too deeply (possible reference cycle)")]
    TemplateNestingLimit { offset: u64 },

    #[error("offset {offset}: failed to decode UTF-16 string")]
    FailedToDecodeUtf16String { offset: u64 },

    #[error("failed to decode ansi string (used encoding scheme {encoding_used}): {message}")]
    AnsiDecodeError {
        encoding_used: &'static str,
        message: String,
    },

    #[error("offset {offset}: failed to decode GUID")]
    InvalidGuid { offset: u64 },
}

/// Errors raised while projecting a decoded record to XML/JSON/tree form.
#[derive(Debug, Error)]
pub enum SerializationError {
    // `quick-xml` maintains the element stack for us, so structural XML
    // errors surface through this generic variant alongside IO errors.
    #[error("writing to XML failed: {message}")]
    XmlOutputError { message: String },

    #[error("building a JSON document failed: {message}")]
    JsonStructureError { message: String },

    #[error("failed to create record model: {message}")]
    RecordStructureError { message: &'static str },

    #[error("`serde_json` failed")]
    JsonError(#[from] serde_json::Error),

    #[error("record data contains invalid UTF-8")]
    RecordContainsInvalidUtf8(#[from] std::string::FromUtf8Error),
}
