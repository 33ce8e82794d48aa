#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use std::sync::Once;

pub const CHUNK_SIZE: usize = 0x10000;
pub const CHUNK_HEADER_SIZE: usize = 512;
pub const FILE_HEADER_SIZE: usize = 4096;

/// 2020-01-01T00:00:00Z as a FILETIME.
pub const FILETIME_2020: u64 = 132_223_104_000_000_000;

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// A record to be encoded: one element, optional attribute, text content.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub id: u64,
    pub filetime: u64,
    pub element: String,
    pub attribute: Option<(String, String)>,
    pub text: String,
}

impl RecordSpec {
    pub fn new(id: u64, element: &str, text: &str) -> Self {
        RecordSpec {
            id,
            filetime: FILETIME_2020 + id * 10_000_000,
            element: element.to_string(),
            attribute: None,
            text: text.to_string(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attribute = Some((name.to_string(), value.to_string()));
        self
    }
}

/// Appends an inline name reference: the u32 offset field pointing just
/// past itself, then the name structure (link, length, string, NUL).
fn push_inline_name(chunk: &mut Vec<u8>, name: &str) {
    let name_offset = (chunk.len() + 4) as u32;
    chunk.write_u32::<LittleEndian>(name_offset).unwrap();
    chunk.write_u32::<LittleEndian>(0).unwrap(); // next string in bucket
    chunk.write_u16::<LittleEndian>(0).unwrap(); // name hash, unchecked
    chunk
        .write_u16::<LittleEndian>(name.encode_utf16().count() as u16)
        .unwrap();
    chunk.extend(utf16_bytes(name));
    chunk.write_u16::<LittleEndian>(0).unwrap(); // terminator
}

/// Appends a value token holding a length-prefixed UTF-16 string.
fn push_string_value(chunk: &mut Vec<u8>, value: &str) {
    chunk.push(0x05); // value token
    chunk.push(0x01); // string type
    chunk
        .write_u16::<LittleEndian>(value.encode_utf16().count() as u16)
        .unwrap();
    chunk.extend(utf16_bytes(value));
}

/// Writes the record header scaffold, returning (record_offset,
/// size_field_offset) for later patching.
fn push_record_header(chunk: &mut Vec<u8>, id: u64, filetime: u64) -> (usize, usize) {
    let record_offset = chunk.len();
    chunk.extend_from_slice(b"\x2a\x2a\x00\x00");
    let size_field_offset = chunk.len();
    chunk.write_u32::<LittleEndian>(0).unwrap();
    chunk.write_u64::<LittleEndian>(id).unwrap();
    chunk.write_u64::<LittleEndian>(filetime).unwrap();
    (record_offset, size_field_offset)
}

/// Writes the trailing size copy and patches the header size field.
fn seal_record(chunk: &mut Vec<u8>, record_offset: usize, size_field_offset: usize) {
    let total_size = (chunk.len() - record_offset + 4) as u32;
    chunk.write_u32::<LittleEndian>(total_size).unwrap();
    chunk[size_field_offset..size_field_offset + 4].copy_from_slice(&total_size.to_le_bytes());
}

/// Encodes one record (header + binxml + trailing size) at the end of
/// `chunk`. Binxml name offsets are chunk-relative, so encoding must
/// happen in place.
fn push_record(chunk: &mut Vec<u8>, spec: &RecordSpec) {
    let (record_offset, size_field_offset) = push_record_header(chunk, spec.id, spec.filetime);

    // Fragment header.
    chunk.extend_from_slice(&[0x0f, 0x01, 0x01, 0x00]);

    // Open start element.
    chunk.push(if spec.attribute.is_some() { 0x41 } else { 0x01 });
    chunk.write_u16::<LittleEndian>(0).unwrap(); // dependency id
    chunk.write_u32::<LittleEndian>(0).unwrap(); // element data size, unchecked
    push_inline_name(chunk, &spec.element);

    if let Some((attribute_name, attribute_value)) = &spec.attribute {
        chunk.write_u32::<LittleEndian>(0).unwrap(); // attribute list size, unchecked
        chunk.push(0x06); // attribute token
        push_inline_name(chunk, attribute_name);
        push_string_value(chunk, attribute_value);
    }

    chunk.push(0x02); // close start element
    push_string_value(chunk, &spec.text);
    chunk.push(0x04); // close element
    chunk.push(0x00); // end of stream

    seal_record(chunk, record_offset, size_field_offset);
}

/// Encodes a record whose binxml is a single template instance with one
/// string substitution. With `definition_offset == None` the definition is
/// written resident and its chunk offset returned; otherwise the record
/// references the given definition.
pub fn push_template_record(
    chunk: &mut Vec<u8>,
    id: u64,
    element: &str,
    substitution: &str,
    definition_offset: Option<u32>,
) -> u32 {
    let (record_offset, size_field_offset) =
        push_record_header(chunk, id, FILETIME_2020 + id * 10_000_000);

    chunk.extend_from_slice(&[0x0f, 0x01, 0x01, 0x00]);

    chunk.push(0x0c); // template instance token
    chunk.push(0x01); // unknown
    chunk.write_u32::<LittleEndian>(7).unwrap(); // template id

    let resolved_offset = match definition_offset {
        Some(offset) => {
            chunk.write_u32::<LittleEndian>(offset).unwrap();
            offset
        }
        None => {
            // Resident definition: starts right after the offset field.
            let offset = (chunk.len() + 4) as u32;
            chunk.write_u32::<LittleEndian>(offset).unwrap();

            chunk.write_u32::<LittleEndian>(0).unwrap(); // next template in bucket
            chunk.extend_from_slice(&[0x11; 16]); // template guid
            let data_size_offset = chunk.len();
            chunk.write_u32::<LittleEndian>(0).unwrap();
            let fragment_start = chunk.len();

            // Skeleton: <element>[slot 0]</element>
            chunk.extend_from_slice(&[0x0f, 0x01, 0x01, 0x00]);
            chunk.push(0x01);
            chunk.write_u16::<LittleEndian>(0).unwrap();
            chunk.write_u32::<LittleEndian>(0).unwrap();
            push_inline_name(chunk, element);
            chunk.push(0x02); // close start element
            chunk.push(0x0d); // normal substitution
            chunk.write_u16::<LittleEndian>(0).unwrap(); // slot index
            chunk.push(0x01); // string type
            chunk.push(0x04); // close element
            chunk.push(0x00); // end of stream

            let data_size = (chunk.len() - fragment_start) as u32;
            chunk[data_size_offset..data_size_offset + 4]
                .copy_from_slice(&data_size.to_le_bytes());

            offset
        }
    };

    // Substitution array: one sized string value.
    let value = utf16_bytes(substitution);
    chunk.write_u32::<LittleEndian>(1).unwrap();
    chunk.write_u16::<LittleEndian>(value.len() as u16).unwrap();
    chunk.push(0x01); // string type
    chunk.push(0x00); // padding
    chunk.extend(value);

    seal_record(chunk, record_offset, size_field_offset);
    resolved_offset
}

/// Fills in the chunk header (magic, record ranges, both CRC32s) and pads
/// to the fixed chunk size. `chunk` must hold the records starting at
/// offset 512.
pub fn finalize_chunk(
    mut chunk: Vec<u8>,
    first_id: u64,
    last_id: u64,
    last_record_offset: usize,
) -> Vec<u8> {
    let free_space_offset = chunk.len() as u32;
    let events_checksum = crc32fast::hash(&chunk[CHUNK_HEADER_SIZE..]);
    chunk.resize(CHUNK_SIZE, 0);

    chunk[0..8].copy_from_slice(b"ElfChnk\x00");
    chunk[8..16].copy_from_slice(&first_id.to_le_bytes());
    chunk[16..24].copy_from_slice(&last_id.to_le_bytes());
    chunk[24..32].copy_from_slice(&first_id.to_le_bytes());
    chunk[32..40].copy_from_slice(&last_id.to_le_bytes());
    chunk[40..44].copy_from_slice(&128u32.to_le_bytes());
    chunk[44..48].copy_from_slice(&(last_record_offset as u32).to_le_bytes());
    chunk[48..52].copy_from_slice(&free_space_offset.to_le_bytes());
    chunk[52..56].copy_from_slice(&events_checksum.to_le_bytes());
    // 56..120 reserved, 120..124 flags: zero.
    // 128..512: string and template offset tables, left empty (all names
    // and templates are read from their inline definitions).

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&chunk[..120]);
    hasher.update(&chunk[128..CHUNK_HEADER_SIZE]);
    chunk[124..128].copy_from_slice(&hasher.finalize().to_le_bytes());

    chunk
}

/// Builds a complete 64 KiB chunk with valid checksums.
pub fn build_chunk(records: &[RecordSpec]) -> Vec<u8> {
    assert!(!records.is_empty(), "a chunk needs at least one record");

    let mut chunk = vec![0u8; CHUNK_HEADER_SIZE];
    let mut last_record_offset = CHUNK_HEADER_SIZE;

    for spec in records {
        last_record_offset = chunk.len();
        push_record(&mut chunk, spec);
    }

    let first = records.first().unwrap();
    let last = records.last().unwrap();
    finalize_chunk(chunk, first.id, last.id, last_record_offset)
}

/// A chunk with two template-instance records sharing one definition,
/// resident in the first record.
pub fn build_template_chunk(element: &str, values: (&str, &str)) -> Vec<u8> {
    let mut chunk = vec![0u8; CHUNK_HEADER_SIZE];

    let definition_offset = push_template_record(&mut chunk, 1, element, values.0, None);
    let last_record_offset = chunk.len();
    push_template_record(&mut chunk, 2, element, values.1, Some(definition_offset));

    finalize_chunk(chunk, 1, 2, last_record_offset)
}

/// Builds a complete EVTX file from per-chunk record lists.
pub fn build_file(chunks: &[Vec<RecordSpec>]) -> Vec<u8> {
    let built: Vec<Vec<u8>> = chunks.iter().map(|specs| build_chunk(specs)).collect();
    build_file_from_chunks(&built)
}

/// Builds an EVTX file around raw chunk buffers (which tests may have
/// corrupted on purpose).
pub fn build_file_from_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    let next_record_id = 1 + chunks
        .iter()
        .filter_map(|chunk| chunk.get(32..40))
        .map(|bytes| u64::from_le_bytes(bytes.try_into().unwrap()))
        .max()
        .unwrap_or(0);

    let mut file = Vec::with_capacity(FILE_HEADER_SIZE + chunks.len() * CHUNK_SIZE);
    file.extend_from_slice(b"ElfFile\x00");
    file.write_u64::<LittleEndian>(0).unwrap(); // first chunk number
    file.write_u64::<LittleEndian>(chunks.len() as u64 - 1)
        .unwrap();
    file.write_u64::<LittleEndian>(next_record_id).unwrap();
    file.write_u32::<LittleEndian>(128).unwrap(); // header size
    file.write_u16::<LittleEndian>(1).unwrap(); // minor version
    file.write_u16::<LittleEndian>(3).unwrap(); // major version
    file.write_u16::<LittleEndian>(4096).unwrap(); // header block size
    file.write_u16::<LittleEndian>(chunks.len() as u16).unwrap();
    file.resize(120, 0);
    file.write_u32::<LittleEndian>(0).unwrap(); // flags

    let checksum = crc32fast::hash(&file[..120]);
    file.write_u32::<LittleEndian>(checksum).unwrap();
    file.resize(FILE_HEADER_SIZE, 0);

    for chunk in chunks {
        file.extend_from_slice(chunk);
    }

    file
}

/// A 3-chunk file with two records per chunk, ids 1..=6.
pub fn three_chunk_file() -> Vec<u8> {
    build_file(&[
        vec![
            RecordSpec::new(1, "Event", "first").with_attribute("Level", "4"),
            RecordSpec::new(2, "Event", "second"),
        ],
        vec![
            RecordSpec::new(3, "Event", "third"),
            RecordSpec::new(4, "Event", "fourth"),
        ],
        vec![
            RecordSpec::new(5, "Event", "fifth"),
            RecordSpec::new(6, "Event", "sixth").with_attribute("Level", "0"),
        ],
    ])
}
