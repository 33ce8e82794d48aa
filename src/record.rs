use crate::binxml::assemble::parse_tokens;
use crate::binxml::model::BinXmlToken;
use crate::cursor::BinCursor;
use crate::err::{DeserializationError, DeserializationResult, SerializationResult};
use crate::json_output::JsonOutput;
use crate::tree_output::{TreeOutput, XmlTree};
use crate::utils::filetime_to_timestamp;
use crate::xml_output::{BinXmlOutput, XmlOutput};
use crate::ParserSettings;

use jiff::Timestamp;

pub const EVTX_RECORD_MAGIC: &[u8; 4] = b"\x2a\x2a\x00\x00";

/// Magic (4) + size (4) + record id (8) + FILETIME (8).
pub const EVTX_RECORD_HEADER_SIZE: usize = 24;

/// Header plus the trailing size copy: the smallest a record can be.
pub const EVTX_RECORD_MIN_SIZE: usize = EVTX_RECORD_HEADER_SIZE + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxRecordHeader {
    /// Total record size, including this header and the trailing size copy.
    pub data_size: u32,
    pub event_record_id: u64,
    /// Absent when the FILETIME field is zero or unrepresentable.
    pub timestamp: Option<Timestamp>,
}

impl EvtxRecordHeader {
    pub fn from_cursor(cursor: &mut BinCursor<'_>) -> DeserializationResult<EvtxRecordHeader> {
        let offset = cursor.position();
        let magic = cursor.array::<4>("record magic")?;

        if &magic != EVTX_RECORD_MAGIC {
            return Err(DeserializationError::BadRecordMagic { magic, offset });
        }

        let data_size = cursor.u32("record size")?;
        let event_record_id = cursor.u64("record id")?;
        let timestamp = filetime_to_timestamp(cursor.filetime()?);

        Ok(EvtxRecordHeader {
            data_size,
            event_record_id,
            timestamp,
        })
    }

    /// Size of the binxml payload between the header and the trailing size
    /// copy.
    pub fn record_data_size(&self) -> u32 {
        self.data_size.saturating_sub(EVTX_RECORD_MIN_SIZE as u32)
    }
}

/// A fully decoded record: its tokenized binxml tree, ready to be
/// projected by one of the output visitors. Owned by the caller once
/// yielded; borrows only the chunk data.
#[derive(Debug, Clone, PartialEq)]
pub struct EvtxRecord<'a> {
    pub event_record_id: u64,
    pub timestamp: Option<Timestamp>,
    pub tokens: Vec<BinXmlToken<'a>>,
    pub settings: &'a ParserSettings,
}

/// A record projected to its final output form.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedEvtxRecord<T> {
    pub event_record_id: u64,
    pub timestamp: Option<Timestamp>,
    pub data: T,
}

impl<'a> EvtxRecord<'a> {
    /// Drives `output` over the record's assembled element stream.
    pub fn into_output<T: BinXmlOutput>(&self, output: &mut T) -> SerializationResult<()> {
        parse_tokens(&self.tokens, output)
    }

    /// Consumes the record, producing an XML document string.
    pub fn into_xml(self) -> SerializationResult<SerializedEvtxRecord<String>> {
        let mut output = XmlOutput::with_writer(Vec::new(), self.settings);
        self.into_output(&mut output)?;

        let data = String::from_utf8(output.into_writer()?)?;
        Ok(SerializedEvtxRecord {
            event_record_id: self.event_record_id,
            timestamp: self.timestamp,
            data,
        })
    }

    /// Consumes the record, producing an ordered `serde_json::Value`.
    pub fn into_json_value(self) -> SerializationResult<SerializedEvtxRecord<serde_json::Value>> {
        let mut output = JsonOutput::new(self.settings);
        self.into_output(&mut output)?;

        Ok(SerializedEvtxRecord {
            event_record_id: self.event_record_id,
            timestamp: self.timestamp,
            data: output.into_value()?,
        })
    }

    /// Consumes the record, producing JSON text.
    pub fn into_json(self) -> SerializationResult<SerializedEvtxRecord<String>> {
        let indent = self.settings.should_indent();
        let record = self.into_json_value()?;

        let data = if indent {
            serde_json::to_string_pretty(&record.data)?
        } else {
            serde_json::to_string(&record.data)?
        };

        Ok(SerializedEvtxRecord {
            event_record_id: record.event_record_id,
            timestamp: record.timestamp,
            data,
        })
    }

    /// Consumes the record, producing an owned ordered tree.
    pub fn into_tree(self) -> SerializationResult<SerializedEvtxRecord<XmlTree>> {
        let mut output = TreeOutput::new();
        self.into_output(&mut output)?;

        Ok(SerializedEvtxRecord {
            event_record_id: self.event_record_id,
            timestamp: self.timestamp,
            data: output.into_tree()?,
        })
    }
}
