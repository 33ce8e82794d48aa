use crate::binxml::stream::read_fragment;
use crate::cursor::BinCursor;
use crate::err::{DeserializationError, DeserializationResult};
use crate::record::{
    EvtxRecord, EvtxRecordHeader, EVTX_RECORD_MAGIC, EVTX_RECORD_MIN_SIZE,
};
use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;
use crate::ChunkOffset;
use crate::ParserSettings;

use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Formatter};

pub const EVTX_CHUNK_SIZE: usize = 0x10000;
pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

const EVTX_CHUNK_MAGIC: &[u8; 8] = b"ElfChnk\x00";

/// The header CRC32 covers bytes [0..120) and [128..512) - everything but
/// the checksum field itself and its padding.
const CHUNK_HEADER_CHECKSUM_SPAN_1: std::ops::Range<usize> = 0..120;
const CHUNK_HEADER_CHECKSUM_SPAN_2: std::ops::Range<usize> = 128..512;

pub struct EvtxChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    pub free_space_offset: u32,
    /// CRC32 over the record data region.
    pub events_checksum: u32,
    /// CRC32 over the header itself.
    pub header_checksum: u32,
    strings_offsets: [ChunkOffset; 64],
    template_offsets: [ChunkOffset; 32],
}

impl Debug for EvtxChunkHeader {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EvtxChunkHeader")
            .field("first_event_record_number", &self.first_event_record_number)
            .field("last_event_record_number", &self.last_event_record_number)
            .field("first_event_record_id", &self.first_event_record_id)
            .field("last_event_record_id", &self.last_event_record_id)
            .field("header_checksum", &self.header_checksum)
            .field("free_space_offset", &self.free_space_offset)
            .finish()
    }
}

impl EvtxChunkHeader {
    /// The 64-bucket string offset table used to seed the string cache.
    pub fn string_offsets(&self) -> &[ChunkOffset] {
        &self.strings_offsets
    }

    /// The 32-bucket template offset table. Definitions are parsed lazily
    /// on first reference, so this table is informational.
    pub fn template_offsets(&self) -> &[ChunkOffset] {
        &self.template_offsets
    }

    pub fn from_buf(buf: &[u8]) -> DeserializationResult<EvtxChunkHeader> {
        let mut cursor = BinCursor::new(buf);

        let magic = cursor.array::<8>("chunk magic")?;
        if &magic != EVTX_CHUNK_MAGIC {
            return Err(DeserializationError::BadChunkMagic { magic });
        }

        let first_event_record_number = cursor.u64("first event record number")?;
        let last_event_record_number = cursor.u64("last event record number")?;
        let first_event_record_id = cursor.u64("first event record id")?;
        let last_event_record_id = cursor.u64("last event record id")?;
        let header_size = cursor.u32("chunk header size")?;
        let last_event_record_data_offset = cursor.u32("last event record data offset")?;
        let free_space_offset = cursor.u32("free space offset")?;
        let events_checksum = cursor.u32("event records checksum")?;

        // Reserved region and flags.
        cursor.skip(64 + 4, "chunk header padding")?;

        let header_checksum = cursor.u32("chunk header checksum")?;

        let mut strings_offsets = [0 as ChunkOffset; 64];
        for slot in strings_offsets.iter_mut() {
            *slot = cursor.u32("string offset table")?;
        }

        let mut template_offsets = [0 as ChunkOffset; 32];
        for slot in template_offsets.iter_mut() {
            *slot = cursor.u32("template offset table")?;
        }

        Ok(EvtxChunkHeader {
            first_event_record_number,
            last_event_record_number,
            first_event_record_id,
            last_event_record_id,
            header_size,
            last_event_record_data_offset,
            free_space_offset,
            events_checksum,
            header_checksum,
            strings_offsets,
            template_offsets,
        })
    }
}

/// An owned 64 KiB chunk buffer with its parsed header.
pub struct EvtxChunkData {
    pub header: EvtxChunkHeader,
    pub data: Vec<u8>,
}

/// True when the region holds no chunk at all (zeroed allocated space,
/// common in dirty files). Distinct from a corrupt chunk.
pub fn is_chunk_unallocated(data: &[u8]) -> bool {
    data[..EVTX_CHUNK_HEADER_SIZE.min(data.len())]
        .iter()
        .all(|&b| b == 0)
}

impl EvtxChunkData {
    /// Fails only when the chunk magic (or the header structure) is
    /// unreadable; checksum validation is separate, so a checksum mismatch
    /// can degrade trust without discarding the chunk.
    pub fn new(data: Vec<u8>) -> DeserializationResult<EvtxChunkData> {
        let header = EvtxChunkHeader::from_buf(&data)?;
        Ok(EvtxChunkData { header, data })
    }

    pub fn validate_header_checksum(&self) -> bool {
        if self.data.len() < EVTX_CHUNK_HEADER_SIZE {
            return false;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[CHUNK_HEADER_CHECKSUM_SPAN_1]);
        hasher.update(&self.data[CHUNK_HEADER_CHECKSUM_SPAN_2]);

        hasher.finalize() == self.header.header_checksum
    }

    pub fn validate_data_checksum(&self) -> bool {
        let free_space_offset = self.header.free_space_offset as usize;
        if free_space_offset < EVTX_CHUNK_HEADER_SIZE || free_space_offset > self.data.len() {
            return false;
        }

        crc32fast::hash(&self.data[EVTX_CHUNK_HEADER_SIZE..free_space_offset])
            == self.header.events_checksum
    }

    pub fn validate_checksum(&self) -> bool {
        self.validate_header_checksum() && self.validate_data_checksum()
    }

    /// Borrows the chunk into its decodable form, seeding the string cache
    /// from the header's offset table.
    pub fn parse<'a>(&'a self, settings: &'a ParserSettings) -> EvtxChunk<'a> {
        let strings = StringCache::seeded(&self.data, &self.header.strings_offsets);

        EvtxChunk {
            data: &self.data,
            header: &self.header,
            trusted: self.validate_checksum(),
            strings: RefCell::new(strings),
            templates: RefCell::new(TemplateCache::new()),
            template_depth: Cell::new(0),
            settings,
        }
    }
}

/// A chunk ready for record decoding. Owns the per-chunk caches; they are
/// populated during decoding and never outlive the chunk.
pub struct EvtxChunk<'a> {
    data: &'a [u8],
    pub header: &'a EvtxChunkHeader,
    /// False when a checksum failed; structural fields are still used for
    /// best-effort decoding.
    pub trusted: bool,
    strings: RefCell<StringCache>,
    templates: RefCell<TemplateCache<'a>>,
    template_depth: Cell<u32>,
    settings: &'a ParserSettings,
}

impl<'a> EvtxChunk<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn settings(&self) -> &'a ParserSettings {
        self.settings
    }

    pub(crate) fn string_cache(&self) -> &RefCell<StringCache> {
        &self.strings
    }

    pub(crate) fn template_cache(&self) -> &RefCell<TemplateCache<'a>> {
        &self.templates
    }

    pub(crate) fn template_nesting_depth(&self) -> u32 {
        self.template_depth.get()
    }

    pub(crate) fn enter_template(&self) -> TemplateNestingGuard<'_> {
        self.template_depth.set(self.template_depth.get() + 1);
        TemplateNestingGuard {
            depth: &self.template_depth,
        }
    }

    /// Iterates the chunk's records, resynchronizing after corruption.
    pub fn records<'c>(&'c self) -> IterChunkRecords<'c, 'a> {
        let free_space_offset = self.header.free_space_offset as usize;
        let end = if (EVTX_CHUNK_HEADER_SIZE..=self.data.len()).contains(&free_space_offset) {
            free_space_offset
        } else {
            warn!(
                "chunk free space offset {free_space_offset} is implausible, scanning the whole chunk"
            );
            self.data.len()
        };

        IterChunkRecords {
            chunk: self,
            offset: EVTX_CHUNK_HEADER_SIZE,
            end,
            exhausted: false,
            skipped: 0,
            last_record_id: None,
        }
    }
}

pub(crate) struct TemplateNestingGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for TemplateNestingGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Debug for EvtxChunk<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "EvtxChunk")?;
        writeln!(fmt, "-----------------------")?;
        writeln!(fmt, "{:#?}", &self.header)?;
        writeln!(fmt, "trusted: {}", self.trusted)?;
        writeln!(fmt, "{} cached strings", self.strings.borrow().len())?;
        writeln!(fmt, "{} cached templates", self.templates.borrow().len())?;
        Ok(())
    }
}

/// Scans for the next plausible record boundary by magic-byte match,
/// bounded to the current chunk.
fn find_record_magic(data: &[u8], from: usize, to: usize) -> Option<usize> {
    let to = to.min(data.len());
    if from >= to {
        return None;
    }

    data[from..to]
        .windows(EVTX_RECORD_MAGIC.len())
        .position(|window| window == EVTX_RECORD_MAGIC)
        .map(|position| position + from)
}

/// Walks a chunk's records sequentially.
///
/// Structural errors never abort the walk: a bad record magic or size
/// triggers a bounded forward scan for the next record magic, a failed
/// binxml decode skips just that record. Everything lost is counted in
/// [`IterChunkRecords::skipped`].
pub struct IterChunkRecords<'c, 'a> {
    chunk: &'c EvtxChunk<'a>,
    offset: usize,
    end: usize,
    exhausted: bool,
    skipped: u64,
    last_record_id: Option<u64>,
}

impl<'c, 'a> IterChunkRecords<'c, 'a> {
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Counts the failure (unless `silent`) and jumps to the next record
    /// magic, or exhausts the chunk when none remains.
    fn resync(&mut self, from: usize, silent: bool) {
        if !silent {
            self.skipped += 1;
        }

        match find_record_magic(self.chunk.data, from, self.end) {
            Some(next) => {
                debug!("resynchronized to record magic at chunk offset {next}");
                self.offset = next;
            }
            None => self.exhausted = true,
        }
    }
}

impl<'c, 'a> Iterator for IterChunkRecords<'c, 'a> {
    type Item = EvtxRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.exhausted {
            if self.offset + EVTX_RECORD_MIN_SIZE > self.end {
                self.exhausted = true;
                break;
            }

            let record_offset = self.offset;
            let mut cursor = match BinCursor::with_pos(self.chunk.data, record_offset) {
                Ok(cursor) => cursor,
                Err(_) => {
                    self.exhausted = true;
                    break;
                }
            };

            let header = match EvtxRecordHeader::from_cursor(&mut cursor) {
                Ok(header) => header,
                Err(e) => {
                    // A zeroed span is leftover free space, not a corrupt
                    // record.
                    let zeroed = matches!(
                        e,
                        DeserializationError::BadRecordMagic { magic: [0, 0, 0, 0], .. }
                    );
                    if !zeroed {
                        warn!("no record at chunk offset {record_offset}: {e}");
                    }
                    self.resync(record_offset + 1, zeroed);
                    continue;
                }
            };

            let total_size = header.data_size as usize;
            if total_size < EVTX_RECORD_MIN_SIZE || record_offset + total_size > self.end {
                let e = DeserializationError::ImplausibleRecordSize {
                    size: header.data_size,
                    offset: record_offset as u64,
                };
                warn!("record {}: {e}, resynchronizing", header.event_record_id);
                self.resync(record_offset + 1, false);
                continue;
            }

            let trailing_size = u32::from_le_bytes(
                self.chunk.data[record_offset + total_size - 4..record_offset + total_size]
                    .try_into()
                    .expect("slice length is 4"),
            );
            if trailing_size != header.data_size {
                let e = DeserializationError::SizeMismatch {
                    declared: header.data_size,
                    trailing: trailing_size,
                    offset: record_offset as u64,
                };
                warn!("record {}: {e}, resynchronizing", header.event_record_id);
                self.resync(record_offset + 1, false);
                continue;
            }

            // The size fields agree, so the next record boundary is known
            // even if the payload fails to decode.
            self.offset = record_offset + total_size;

            let tokens = read_fragment(
                &mut cursor,
                Some(self.chunk),
                self.chunk.settings.get_ansi_codec(),
                Some(header.record_data_size()),
            );

            match tokens {
                Ok(tokens) => {
                    if let Some(last) = self.last_record_id {
                        if header.event_record_id <= last {
                            warn!(
                                "record ids are not monotonically increasing: {} after {last}",
                                header.event_record_id
                            );
                        }
                    }
                    self.last_record_id = Some(header.event_record_id);

                    if header.event_record_id == self.chunk.header.last_event_record_id {
                        self.exhausted = true;
                    }

                    return Some(EvtxRecord {
                        event_record_id: header.event_record_id,
                        timestamp: header.timestamp,
                        tokens,
                        settings: self.chunk.settings,
                    });
                }
                Err(e) => {
                    warn!(
                        "failed to deserialize record {}: {e}",
                        header.event_record_id
                    );
                    self.skipped += 1;
                    continue;
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chunk_header_magic_is_checked() {
        let mut buf = vec![0u8; EVTX_CHUNK_HEADER_SIZE];
        buf[..8].copy_from_slice(b"BadMagic");

        assert!(matches!(
            EvtxChunkHeader::from_buf(&buf),
            Err(DeserializationError::BadChunkMagic { .. })
        ));
    }

    #[test]
    fn test_unallocated_region_detection() {
        assert!(is_chunk_unallocated(&[0u8; EVTX_CHUNK_SIZE]));

        let mut data = vec![0u8; EVTX_CHUNK_SIZE];
        data[3] = 1;
        assert!(!is_chunk_unallocated(&data));
    }

    #[test]
    fn test_find_record_magic_is_bounded() {
        let mut data = vec![0u8; 64];
        data[30..34].copy_from_slice(EVTX_RECORD_MAGIC);

        assert_eq!(find_record_magic(&data, 0, 64), Some(30));
        assert_eq!(find_record_magic(&data, 31, 64), None);
        assert_eq!(find_record_magic(&data, 0, 20), None);
        assert_eq!(find_record_magic(&data, 60, 64), None);
    }
}
