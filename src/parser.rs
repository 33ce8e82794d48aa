use crate::chunk::{is_chunk_unallocated, EvtxChunkData, EVTX_CHUNK_SIZE};
use crate::err::{EvtxError, Result, SerializationResult};
use crate::file_header::{EvtxFileHeader, EVTX_FILE_HEADER_SIZE};
use crate::record::{EvtxRecord, SerializedEvtxRecord};
use crate::tree_output::XmlTree;
use crate::ParserSettings;

use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}

/// Side-channel accounting of what recovery had to give up on.
///
/// Chunk- and record-level corruption never interrupts the record
/// sequence; it is counted here instead, so data loss is always visible.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records successfully decoded and yielded.
    pub processed: u64,
    /// Records lost to corruption or serialization failures.
    pub skipped: u64,
    /// Chunks skipped entirely (bad magic, unreadable header, or strict
    /// checksum mode).
    pub corrupt_chunks: u64,
}

impl fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {} | skipped: {} | corrupt chunks: {}",
            self.processed, self.skipped, self.corrupt_chunks
        )
    }
}

/// Projects one decoded record into its output form. Plain functions (not
/// closures) so the parallel path can share them freely.
pub type RecordSerializer<O> =
    for<'r> fn(EvtxRecord<'r>) -> SerializationResult<SerializedEvtxRecord<O>>;

fn serialize_xml(record: EvtxRecord<'_>) -> SerializationResult<SerializedEvtxRecord<String>> {
    record.into_xml()
}

fn serialize_json(record: EvtxRecord<'_>) -> SerializationResult<SerializedEvtxRecord<String>> {
    record.into_json()
}

fn serialize_json_value(
    record: EvtxRecord<'_>,
) -> SerializationResult<SerializedEvtxRecord<serde_json::Value>> {
    record.into_json_value()
}

fn serialize_tree(record: EvtxRecord<'_>) -> SerializationResult<SerializedEvtxRecord<XmlTree>> {
    record.into_tree()
}

/// Reads an EVTX file: validates the 4 KiB file header, then exposes the
/// chunk sequence as lazy record iterators.
///
/// The header's chunk count is treated as a hint only; the walk ends when
/// the underlying stream is exhausted.
pub struct EvtxParser<T: ReadSeek> {
    data: T,
    config: ParserSettings,
    header: EvtxFileHeader,
}

impl EvtxParser<BufReader<File>> {
    /// Attempts to load an evtx file from disk, will fail if the file
    /// cannot be opened or if the header is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EvtxError::FailedToOpenFile {
            source: e,
            path: path.to_path_buf(),
        })?;

        Self::from_read_seek(BufReader::new(file))
    }
}

impl EvtxParser<Cursor<Vec<u8>>> {
    /// Attempts to load an evtx file from an in-memory buffer, will fail
    /// if the header is invalid.
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        Self::from_read_seek(Cursor::new(buffer))
    }
}

impl<T: ReadSeek> EvtxParser<T> {
    fn from_read_seek(mut data: T) -> Result<Self> {
        let mut header_buf = Vec::with_capacity(EVTX_FILE_HEADER_SIZE);
        (&mut data)
            .take(EVTX_FILE_HEADER_SIZE as u64)
            .read_to_end(&mut header_buf)?;

        let header = EvtxFileHeader::from_buf(&header_buf)?;

        if !header.verify_checksum(&header_buf) {
            warn!("file header checksum mismatch, header fields are used as hints only");
        }

        debug!("EVTX header: {header:#?}");

        Ok(EvtxParser {
            data,
            config: ParserSettings::default(),
            header,
        })
    }

    pub fn with_configuration(mut self, configuration: ParserSettings) -> Self {
        self.config = configuration;
        self
    }

    pub fn header(&self) -> &EvtxFileHeader {
        &self.header
    }

    pub fn config(&self) -> &ParserSettings {
        &self.config
    }

    /// Reads the chunk at `chunk_number`, or `None` past the end of the
    /// stream. A short read returns the partial buffer; validation decides
    /// what can be salvaged from it.
    fn allocate_chunk(&mut self, chunk_number: u64) -> io::Result<Option<Vec<u8>>> {
        let offset = EVTX_FILE_HEADER_SIZE as u64 + chunk_number * EVTX_CHUNK_SIZE as u64;
        self.data.seek(SeekFrom::Start(offset))?;

        let mut buffer = Vec::with_capacity(EVTX_CHUNK_SIZE);
        (&mut self.data)
            .take(EVTX_CHUNK_SIZE as u64)
            .read_to_end(&mut buffer)?;

        if buffer.is_empty() {
            Ok(None)
        } else {
            if buffer.len() < EVTX_CHUNK_SIZE {
                debug!(
                    "chunk {chunk_number} is truncated ({} of {EVTX_CHUNK_SIZE} bytes)",
                    buffer.len()
                );
            }
            Ok(Some(buffer))
        }
    }

    /// Iterates over all records, serialized as XML documents.
    pub fn records(&mut self) -> IterSerializedRecords<'_, T, String> {
        self.serialized_records(serialize_xml)
    }

    /// Iterates over all records, serialized as JSON text.
    pub fn records_json(&mut self) -> IterSerializedRecords<'_, T, String> {
        self.serialized_records(serialize_json)
    }

    /// Iterates over all records as ordered `serde_json::Value` documents.
    pub fn records_json_value(&mut self) -> IterSerializedRecords<'_, T, serde_json::Value> {
        self.serialized_records(serialize_json_value)
    }

    /// Iterates over all records as owned structured trees.
    pub fn records_tree(&mut self) -> IterSerializedRecords<'_, T, XmlTree> {
        self.serialized_records(serialize_tree)
    }

    /// Iterates over all records using a caller-supplied projector.
    pub fn serialized_records<O: Send>(
        &mut self,
        serializer: RecordSerializer<O>,
    ) -> IterSerializedRecords<'_, T, O> {
        IterSerializedRecords {
            parser: self,
            serializer,
            queue: VecDeque::new(),
            next_chunk_number: 0,
            done: false,
            stats: RecoveryStats::default(),
        }
    }
}

struct ChunkOutcome<O> {
    records: Vec<SerializedEvtxRecord<O>>,
    skipped: u64,
    corrupt: bool,
}

impl<O> ChunkOutcome<O> {
    fn empty() -> Self {
        ChunkOutcome {
            records: Vec::new(),
            skipped: 0,
            corrupt: false,
        }
    }

    fn corrupt() -> Self {
        ChunkOutcome {
            records: Vec::new(),
            skipped: 0,
            corrupt: true,
        }
    }
}

/// Decodes one chunk buffer to completion, applying the recovery policy:
/// unallocated region -> skip silently; bad magic / unreadable header ->
/// corrupt; checksum mismatch -> degrade trust (or skip in strict mode);
/// record errors -> counted by the chunk iterator.
fn process_chunk<O>(
    chunk_number: u64,
    buffer: Vec<u8>,
    config: &ParserSettings,
    serializer: RecordSerializer<O>,
) -> ChunkOutcome<O> {
    if is_chunk_unallocated(&buffer) {
        debug!("chunk {chunk_number} is unallocated, skipping");
        return ChunkOutcome::empty();
    }

    let chunk_data = match EvtxChunkData::new(buffer) {
        Ok(chunk_data) => chunk_data,
        Err(e) => {
            warn!("chunk {chunk_number} cannot be read: {e}");
            return ChunkOutcome::corrupt();
        }
    };

    if !chunk_data.validate_checksum() {
        if config.should_validate_checksums() {
            warn!("chunk {chunk_number} failed checksum validation, skipping (strict mode)");
            return ChunkOutcome::corrupt();
        }
        warn!("chunk {chunk_number} failed checksum validation, attempting best-effort decode");
    }

    let chunk = chunk_data.parse(config);
    debug!("{chunk:?}");

    let mut records = Vec::new();
    let mut skipped = 0;

    let mut iter = chunk.records();
    for record in iter.by_ref() {
        let record_id = record.event_record_id;
        match serializer(record) {
            Ok(serialized) => records.push(serialized),
            Err(e) => {
                warn!("failed to serialize record {record_id}: {e}");
                skipped += 1;
            }
        }
    }
    skipped += iter.skipped();

    ChunkOutcome {
        records,
        skipped,
        corrupt: false,
    }
}

/// Lazy, single-pass, non-restartable sequence of serialized records.
///
/// Yields only successfully decoded records; everything else is counted in
/// [`RecoveryStats`], available through [`IterSerializedRecords::stats`] at
/// any point during or after iteration.
pub struct IterSerializedRecords<'p, T: ReadSeek, O> {
    parser: &'p mut EvtxParser<T>,
    serializer: RecordSerializer<O>,
    queue: VecDeque<SerializedEvtxRecord<O>>,
    next_chunk_number: u64,
    done: bool,
    stats: RecoveryStats,
}

impl<T: ReadSeek, O: Send> IterSerializedRecords<'_, T, O> {
    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Number of chunks decoded together. With multithreading enabled this
    /// is the worker count; chunks are self-contained, so they decode
    /// independently and merge back in file order.
    fn batch_size(&self) -> usize {
        #[cfg(feature = "multithreading")]
        {
            match self.parser.config.get_num_threads() {
                0 => rayon::current_num_threads().max(1),
                n => n,
            }
        }
        #[cfg(not(feature = "multithreading"))]
        {
            1
        }
    }

    fn fill_queue(&mut self) {
        let batch_size = self.batch_size();
        let mut buffers = Vec::with_capacity(batch_size);

        while buffers.len() < batch_size && !self.done {
            match self.parser.allocate_chunk(self.next_chunk_number) {
                Ok(Some(buffer)) => {
                    buffers.push((self.next_chunk_number, buffer));
                    self.next_chunk_number += 1;
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    warn!(
                        "I/O error while reading chunk {}: {e}",
                        self.next_chunk_number
                    );
                    self.stats.corrupt_chunks += 1;
                    self.done = true;
                }
            }
        }

        if buffers.is_empty() {
            return;
        }

        let config = &self.parser.config;
        let serializer = self.serializer;

        #[cfg(feature = "multithreading")]
        let outcomes: Vec<ChunkOutcome<O>> = if buffers.len() > 1 {
            use rayon::prelude::*;
            buffers
                .into_par_iter()
                .map(|(number, buffer)| process_chunk(number, buffer, config, serializer))
                .collect()
        } else {
            buffers
                .into_iter()
                .map(|(number, buffer)| process_chunk(number, buffer, config, serializer))
                .collect()
        };

        #[cfg(not(feature = "multithreading"))]
        let outcomes: Vec<ChunkOutcome<O>> = buffers
            .into_iter()
            .map(|(number, buffer)| process_chunk(number, buffer, config, serializer))
            .collect();

        for outcome in outcomes {
            self.stats.skipped += outcome.skipped;
            if outcome.corrupt {
                self.stats.corrupt_chunks += 1;
            }
            self.queue.extend(outcome.records);
        }
    }
}

impl<T: ReadSeek, O: Send> Iterator for IterSerializedRecords<'_, T, O> {
    type Item = SerializedEvtxRecord<O>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.queue.pop_front() {
                self.stats.processed += 1;
                return Some(record);
            }

            if self.done {
                debug!("record iteration finished: {}", self.stats);
                return None;
            }

            self.fill_queue();
        }
    }
}
