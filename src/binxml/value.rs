use crate::binxml::model::BinXmlToken;
use crate::binxml::stream::read_fragment;
use crate::chunk::EvtxChunk;
use crate::cursor::BinCursor;
use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::{filetime_to_timestamp, format_timestamp};

use encoding::{DecoderTrap, EncodingRef};
use jiff::civil;
use jiff::tz::TimeZone;
use jiff::Timestamp;
use log::warn;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::fmt::Write as _;
use winstructs::guid::Guid;

/// The wire type tag of a binxml value.
#[derive(Debug, PartialOrd, PartialEq, Eq, Clone)]
pub enum BinXmlValueType {
    Null,
    String,
    AnsiString,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real32,
    Real64,
    Bool,
    Binary,
    Guid,
    SizeT,
    FileTime,
    SysTime,
    Sid,
    HexInt32,
    HexInt64,
    EvtHandle,
    BinXml,
    EvtXml,
    StringArray,
    AnsiStringArray,
    Int8Array,
    UInt8Array,
    Int16Array,
    UInt16Array,
    Int32Array,
    UInt32Array,
    Int64Array,
    UInt64Array,
    Real32Array,
    Real64Array,
    BoolArray,
    BinaryArray,
    GuidArray,
    SizeTArray,
    FileTimeArray,
    SysTimeArray,
    SidArray,
    HexInt32Array,
    HexInt64Array,
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::Null),
            0x01 => Some(BinXmlValueType::String),
            0x02 => Some(BinXmlValueType::AnsiString),
            0x03 => Some(BinXmlValueType::Int8),
            0x04 => Some(BinXmlValueType::UInt8),
            0x05 => Some(BinXmlValueType::Int16),
            0x06 => Some(BinXmlValueType::UInt16),
            0x07 => Some(BinXmlValueType::Int32),
            0x08 => Some(BinXmlValueType::UInt32),
            0x09 => Some(BinXmlValueType::Int64),
            0x0a => Some(BinXmlValueType::UInt64),
            0x0b => Some(BinXmlValueType::Real32),
            0x0c => Some(BinXmlValueType::Real64),
            0x0d => Some(BinXmlValueType::Bool),
            0x0e => Some(BinXmlValueType::Binary),
            0x0f => Some(BinXmlValueType::Guid),
            0x10 => Some(BinXmlValueType::SizeT),
            0x11 => Some(BinXmlValueType::FileTime),
            0x12 => Some(BinXmlValueType::SysTime),
            0x13 => Some(BinXmlValueType::Sid),
            0x14 => Some(BinXmlValueType::HexInt32),
            0x15 => Some(BinXmlValueType::HexInt64),
            0x20 => Some(BinXmlValueType::EvtHandle),
            0x21 => Some(BinXmlValueType::BinXml),
            0x23 => Some(BinXmlValueType::EvtXml),
            0x81 => Some(BinXmlValueType::StringArray),
            0x82 => Some(BinXmlValueType::AnsiStringArray),
            0x83 => Some(BinXmlValueType::Int8Array),
            0x84 => Some(BinXmlValueType::UInt8Array),
            0x85 => Some(BinXmlValueType::Int16Array),
            0x86 => Some(BinXmlValueType::UInt16Array),
            0x87 => Some(BinXmlValueType::Int32Array),
            0x88 => Some(BinXmlValueType::UInt32Array),
            0x89 => Some(BinXmlValueType::Int64Array),
            0x8a => Some(BinXmlValueType::UInt64Array),
            0x8b => Some(BinXmlValueType::Real32Array),
            0x8c => Some(BinXmlValueType::Real64Array),
            0x8d => Some(BinXmlValueType::BoolArray),
            0x8e => Some(BinXmlValueType::BinaryArray),
            0x8f => Some(BinXmlValueType::GuidArray),
            0x90 => Some(BinXmlValueType::SizeTArray),
            0x91 => Some(BinXmlValueType::FileTimeArray),
            0x92 => Some(BinXmlValueType::SysTimeArray),
            0x93 => Some(BinXmlValueType::SidArray),
            0x94 => Some(BinXmlValueType::HexInt32Array),
            0x95 => Some(BinXmlValueType::HexInt64Array),
            _ => None,
        }
    }
}

/// A decoded binxml value. Binary payloads borrow from the chunk data.
#[derive(Debug, PartialEq, Clone)]
pub enum BinXmlValue<'a> {
    Null,
    String(String),
    AnsiString(String),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Bool(bool),
    Binary(&'a [u8]),
    Guid(Guid),
    FileTime(Timestamp),
    SysTime(Timestamp),
    Sid(String),
    HexInt32(u32),
    HexInt64(u64),
    /// An embedded binxml fragment, already tokenized. Expanded during
    /// assembly, never projected directly.
    BinXml(Vec<BinXmlToken<'a>>),
    StringArray(Vec<String>),
    Int8Array(Vec<i8>),
    UInt8Array(&'a [u8]),
    Int16Array(Vec<i16>),
    UInt16Array(Vec<u16>),
    Int32Array(Vec<i32>),
    UInt32Array(Vec<u32>),
    Int64Array(Vec<i64>),
    UInt64Array(Vec<u64>),
    Real32Array(Vec<f32>),
    Real64Array(Vec<f64>),
    BoolArray(Vec<bool>),
    GuidArray(Vec<Guid>),
    FileTimeArray(Vec<Timestamp>),
    HexInt32Array(Vec<u32>),
    HexInt64Array(Vec<u64>),
    SidArray(Vec<String>),
    /// Fallback for unknown or unimplemented type tags whose size is
    /// declared by a substitution descriptor. Rendered as hex.
    Raw(&'a [u8]),
}

/// Decodes a SID structure: revision, sub-authority count, a 48-bit
/// big-endian authority, then the sub-authorities.
fn read_sid(cursor: &mut BinCursor<'_>) -> DeserializationResult<String> {
    let revision = cursor.u8("sid revision")?;
    let sub_count = cursor.u8("sid sub-authority count")?;

    let authority_bytes = cursor.array::<6>("sid authority")?;
    let mut authority: u64 = 0;
    for b in authority_bytes {
        authority = (authority << 8) | u64::from(b);
    }

    let mut sid = format!("S-{revision}-{authority}");
    for _ in 0..sub_count {
        let sub = cursor.u32("sid sub-authority")?;
        write!(sid, "-{sub}").expect("writing to a string cannot fail");
    }

    Ok(sid)
}

fn read_systime(cursor: &mut BinCursor<'_>) -> DeserializationResult<Option<Timestamp>> {
    let year = cursor.u16("systime year")?;
    let month = cursor.u16("systime month")?;
    let _day_of_week = cursor.u16("systime day of week")?;
    let day = cursor.u16("systime day")?;
    let hour = cursor.u16("systime hour")?;
    let minute = cursor.u16("systime minute")?;
    let second = cursor.u16("systime second")?;
    let millis = cursor.u16("systime milliseconds")?;

    let timestamp = civil::Date::new(year as i16, month as i8, day as i8)
        .and_then(|date| {
            let time = civil::Time::new(
                hour as i8,
                minute as i8,
                second as i8,
                i32::from(millis) * 1_000_000,
            )?;
            civil::DateTime::from_parts(date, time).to_zoned(TimeZone::UTC)
        })
        .map(|zoned| zoned.timestamp());

    match timestamp {
        Ok(ts) => Ok(Some(ts)),
        Err(_) => {
            warn!("SYSTEMTIME value with out-of-range components, dropping timestamp");
            Ok(None)
        }
    }
}

/// Reads consecutive fixed-layout items until `size` bytes are consumed.
fn read_array<'a, T>(
    cursor: &mut BinCursor<'a>,
    size: u16,
    what: &'static str,
    mut read_item: impl FnMut(&mut BinCursor<'a>) -> DeserializationResult<T>,
) -> DeserializationResult<Vec<T>> {
    let end = cursor.pos() + usize::from(size);
    let mut items = Vec::new();

    while cursor.pos() < end {
        items.push(read_item(cursor)?);
    }

    if cursor.pos() != end {
        return Err(DeserializationError::Truncated {
            what,
            offset: cursor.position(),
            need: usize::from(size),
            have: cursor.pos() - (end - usize::from(size)),
        });
    }

    Ok(items)
}

impl<'a> BinXmlValue<'a> {
    /// Reads a type tag byte followed by an unsized value (the `Value`
    /// token form used in element content and attribute values).
    pub fn from_binxml_stream(
        cursor: &mut BinCursor<'a>,
        chunk: Option<&EvtxChunk<'a>>,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let offset = cursor.position();
        let type_token = cursor.u8("value type")?;
        let value_type = BinXmlValueType::from_u8(type_token).ok_or(
            DeserializationError::InvalidValueVariant {
                value: type_token,
                offset,
            },
        )?;

        Self::deserialize_value_type(&value_type, cursor, chunk, None, ansi_codec)
    }

    /// Decodes one value of a known type. `size` is present for
    /// substitution values (declared by their descriptor) and absent for
    /// inline `Value` tokens.
    pub fn deserialize_value_type(
        value_type: &BinXmlValueType,
        cursor: &mut BinCursor<'a>,
        chunk: Option<&EvtxChunk<'a>>,
        size: Option<u16>,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let value = match (value_type, size) {
            (BinXmlValueType::Null, _) => BinXmlValue::Null,

            (BinXmlValueType::String, Some(sz)) => {
                let sz_bytes = usize::from(sz);
                if !sz_bytes.is_multiple_of(2) {
                    return Err(DeserializationError::FailedToDecodeUtf16String {
                        offset: cursor.position(),
                    });
                }
                BinXmlValue::String(cursor.utf16_by_char_count(sz_bytes / 2, "string value")?)
            }
            (BinXmlValueType::String, None) => {
                BinXmlValue::String(cursor.len_prefixed_utf16(false, "string value")?)
            }

            (BinXmlValueType::AnsiString, Some(sz)) => {
                let raw = cursor.take_bytes(usize::from(sz), "ansi string value")?;
                // Writers occasionally embed NUL padding mid-string.
                let filtered: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
                let decoded = ansi_codec
                    .decode(&filtered, DecoderTrap::Strict)
                    .map_err(|message| DeserializationError::AnsiDecodeError {
                        encoding_used: ansi_codec.name(),
                        message: message.to_string(),
                    })?;
                BinXmlValue::AnsiString(decoded)
            }
            // Ansi strings are always sized.
            (BinXmlValueType::AnsiString, None) => {
                return Err(DeserializationError::UnimplementedToken {
                    name: "unsized AnsiString",
                    offset: cursor.position(),
                });
            }

            (BinXmlValueType::Int8, _) => BinXmlValue::Int8(cursor.i8("i8 value")?),
            (BinXmlValueType::UInt8, _) => BinXmlValue::UInt8(cursor.u8("u8 value")?),
            (BinXmlValueType::Int16, _) => BinXmlValue::Int16(cursor.i16("i16 value")?),
            (BinXmlValueType::UInt16, _) => BinXmlValue::UInt16(cursor.u16("u16 value")?),
            (BinXmlValueType::Int32, _) => BinXmlValue::Int32(cursor.i32("i32 value")?),
            (BinXmlValueType::UInt32, _) => BinXmlValue::UInt32(cursor.u32("u32 value")?),
            (BinXmlValueType::Int64, _) => BinXmlValue::Int64(cursor.i64("i64 value")?),
            (BinXmlValueType::UInt64, _) => BinXmlValue::UInt64(cursor.u64("u64 value")?),
            (BinXmlValueType::Real32, _) => BinXmlValue::Real32(cursor.f32("f32 value")?),
            (BinXmlValueType::Real64, _) => BinXmlValue::Real64(cursor.f64("f64 value")?),

            (BinXmlValueType::Bool, _) => {
                let raw = cursor.i32("bool value")?;
                if raw != 0 && raw != 1 {
                    warn!(
                        "invalid boolean value {} at offset {}; treating as {}",
                        raw,
                        cursor.position(),
                        raw != 0
                    );
                }
                BinXmlValue::Bool(raw != 0)
            }

            (BinXmlValueType::Guid, _) => BinXmlValue::Guid(cursor.guid()?),

            (BinXmlValueType::SizeT, Some(4)) => BinXmlValue::HexInt32(cursor.u32("sizet32")?),
            (BinXmlValueType::SizeT, Some(8)) => BinXmlValue::HexInt64(cursor.u64("sizet64")?),

            (BinXmlValueType::FileTime, _) => match filetime_to_timestamp(cursor.filetime()?) {
                Some(ts) => BinXmlValue::FileTime(ts),
                None => BinXmlValue::Null,
            },
            (BinXmlValueType::SysTime, _) => match read_systime(cursor)? {
                Some(ts) => BinXmlValue::SysTime(ts),
                None => BinXmlValue::Null,
            },
            (BinXmlValueType::Sid, _) => BinXmlValue::Sid(read_sid(cursor)?),

            (BinXmlValueType::HexInt32, _) => BinXmlValue::HexInt32(cursor.u32("hex32 value")?),
            (BinXmlValueType::HexInt64, _) => BinXmlValue::HexInt64(cursor.u64("hex64 value")?),

            (BinXmlValueType::Binary, Some(sz)) => {
                BinXmlValue::Binary(cursor.take_bytes(usize::from(sz), "binary value")?)
            }

            (BinXmlValueType::BinXml, size) => {
                let limit = match size {
                    Some(sz) => u32::from(sz),
                    None => u32::from(cursor.u16("binxml payload length")?),
                };
                BinXmlValue::BinXml(read_fragment(cursor, chunk, ansi_codec, Some(limit))?)
            }

            // The array types are always sized.
            (BinXmlValueType::StringArray, Some(sz)) => BinXmlValue::StringArray(read_array(
                cursor,
                sz,
                "string array",
                |c| c.null_terminated_utf16("string array item"),
            )?),
            (BinXmlValueType::Int8Array, Some(sz)) => BinXmlValue::Int8Array(read_array(
                cursor,
                sz,
                "i8 array",
                |c| c.i8("i8 array item"),
            )?),
            (BinXmlValueType::UInt8Array, Some(sz)) => {
                BinXmlValue::UInt8Array(cursor.take_bytes(usize::from(sz), "u8 array")?)
            }
            (BinXmlValueType::Int16Array, Some(sz)) => BinXmlValue::Int16Array(read_array(
                cursor,
                sz,
                "i16 array",
                |c| c.i16("i16 array item"),
            )?),
            (BinXmlValueType::UInt16Array, Some(sz)) => BinXmlValue::UInt16Array(read_array(
                cursor,
                sz,
                "u16 array",
                |c| c.u16("u16 array item"),
            )?),
            (BinXmlValueType::Int32Array, Some(sz)) => BinXmlValue::Int32Array(read_array(
                cursor,
                sz,
                "i32 array",
                |c| c.i32("i32 array item"),
            )?),
            (BinXmlValueType::UInt32Array, Some(sz)) => BinXmlValue::UInt32Array(read_array(
                cursor,
                sz,
                "u32 array",
                |c| c.u32("u32 array item"),
            )?),
            (BinXmlValueType::Int64Array, Some(sz)) => BinXmlValue::Int64Array(read_array(
                cursor,
                sz,
                "i64 array",
                |c| c.i64("i64 array item"),
            )?),
            (BinXmlValueType::UInt64Array, Some(sz)) => BinXmlValue::UInt64Array(read_array(
                cursor,
                sz,
                "u64 array",
                |c| c.u64("u64 array item"),
            )?),
            (BinXmlValueType::Real32Array, Some(sz)) => BinXmlValue::Real32Array(read_array(
                cursor,
                sz,
                "f32 array",
                |c| c.f32("f32 array item"),
            )?),
            (BinXmlValueType::Real64Array, Some(sz)) => BinXmlValue::Real64Array(read_array(
                cursor,
                sz,
                "f64 array",
                |c| c.f64("f64 array item"),
            )?),
            (BinXmlValueType::BoolArray, Some(sz)) => BinXmlValue::BoolArray(read_array(
                cursor,
                sz,
                "bool array",
                |c| Ok(c.i32("bool array item")? != 0),
            )?),
            (BinXmlValueType::GuidArray, Some(sz)) => {
                BinXmlValue::GuidArray(read_array(cursor, sz, "guid array", |c| c.guid())?)
            }
            (BinXmlValueType::FileTimeArray, Some(sz)) => BinXmlValue::FileTimeArray(read_array(
                cursor,
                sz,
                "filetime array",
                |c| Ok(filetime_to_timestamp(c.filetime()?).unwrap_or(Timestamp::UNIX_EPOCH)),
            )?),
            (BinXmlValueType::HexInt32Array, Some(sz)) => BinXmlValue::HexInt32Array(read_array(
                cursor,
                sz,
                "hex32 array",
                |c| c.u32("hex32 array item"),
            )?),
            (BinXmlValueType::HexInt64Array, Some(sz)) => BinXmlValue::HexInt64Array(read_array(
                cursor,
                sz,
                "hex64 array",
                |c| c.u64("hex64 array item"),
            )?),
            (BinXmlValueType::SidArray, Some(sz)) => {
                BinXmlValue::SidArray(read_array(cursor, sz, "sid array", read_sid)?)
            }

            // Anything else with a declared size degrades to raw bytes
            // instead of failing the record.
            (other, Some(sz)) => {
                warn!(
                    "value type {:?} at offset {} is unimplemented, keeping {} raw byte(s)",
                    other,
                    cursor.position(),
                    sz
                );
                BinXmlValue::Raw(cursor.take_bytes(usize::from(sz), "raw value fallback")?)
            }

            (other, None) => {
                let _ = other;
                return Err(DeserializationError::UnimplementedToken {
                    name: "unsized value of an unimplemented type",
                    offset: cursor.position(),
                });
            }
        };

        Ok(value)
    }

    /// Textual projection used for XML attribute values and text nodes.
    pub fn as_cow_str(&self) -> Cow<'_, str> {
        match self {
            BinXmlValue::Null => Cow::Borrowed(""),
            BinXmlValue::String(s) => Cow::Borrowed(s.as_str()),
            BinXmlValue::AnsiString(s) => Cow::Borrowed(s.as_str()),
            BinXmlValue::Int8(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt8(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int16(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt16(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int32(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt32(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Int64(num) => Cow::Owned(num.to_string()),
            BinXmlValue::UInt64(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Real32(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Real64(num) => Cow::Owned(num.to_string()),
            BinXmlValue::Bool(b) => Cow::Owned(b.to_string()),
            BinXmlValue::Binary(bytes) => Cow::Owned(to_hex_string(bytes)),
            BinXmlValue::Guid(guid) => Cow::Owned(guid.to_string()),
            BinXmlValue::FileTime(ts) => Cow::Owned(format_timestamp(ts)),
            BinXmlValue::SysTime(ts) => Cow::Owned(format_timestamp(ts)),
            BinXmlValue::Sid(sid) => Cow::Borrowed(sid.as_str()),
            BinXmlValue::HexInt32(v) => Cow::Owned(format!("0x{v:x}")),
            BinXmlValue::HexInt64(v) => Cow::Owned(format!("0x{v:x}")),
            BinXmlValue::BinXml(_) => Cow::Borrowed(""),
            BinXmlValue::StringArray(items) => Cow::Owned(items.join(",")),
            BinXmlValue::Int8Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt8Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Int16Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt16Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Int32Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt32Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Int64Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::UInt64Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Real32Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::Real64Array(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::BoolArray(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::GuidArray(items) => Cow::Owned(to_delimited_list(items)),
            BinXmlValue::FileTimeArray(items) => Cow::Owned(
                items
                    .iter()
                    .map(format_timestamp)
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::HexInt32Array(items) => Cow::Owned(
                items
                    .iter()
                    .map(|v| format!("0x{v:x}"))
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::HexInt64Array(items) => Cow::Owned(
                items
                    .iter()
                    .map(|v| format!("0x{v:x}"))
                    .collect::<Vec<String>>()
                    .join(","),
            ),
            BinXmlValue::SidArray(items) => Cow::Owned(items.join(",")),
            BinXmlValue::Raw(bytes) => Cow::Owned(to_hex_string(bytes)),
        }
    }
}

fn to_hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, &b| {
            write!(acc, "{b:02X}").expect("writing to a string cannot fail");
            acc
        })
}

fn to_delimited_list<N: ToString>(items: &[N]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(",")
}

impl From<&BinXmlValue<'_>> for Value {
    fn from(value: &BinXmlValue<'_>) -> Self {
        match value {
            BinXmlValue::Null => Value::Null,
            BinXmlValue::String(s) => json!(s),
            BinXmlValue::AnsiString(s) => json!(s),
            BinXmlValue::Int8(num) => json!(num),
            BinXmlValue::UInt8(num) => json!(num),
            BinXmlValue::Int16(num) => json!(num),
            BinXmlValue::UInt16(num) => json!(num),
            BinXmlValue::Int32(num) => json!(num),
            BinXmlValue::UInt32(num) => json!(num),
            BinXmlValue::Int64(num) => json!(num),
            BinXmlValue::UInt64(num) => json!(num),
            BinXmlValue::Real32(num) => json!(num),
            BinXmlValue::Real64(num) => json!(num),
            BinXmlValue::Bool(b) => json!(b),
            BinXmlValue::Binary(bytes) => json!(to_hex_string(bytes)),
            BinXmlValue::Guid(guid) => json!(guid.to_string()),
            BinXmlValue::FileTime(ts) => json!(format_timestamp(ts)),
            BinXmlValue::SysTime(ts) => json!(format_timestamp(ts)),
            BinXmlValue::Sid(sid) => json!(sid),
            BinXmlValue::HexInt32(v) => json!(format!("0x{v:x}")),
            BinXmlValue::HexInt64(v) => json!(format!("0x{v:x}")),
            BinXmlValue::BinXml(_) => Value::Null,
            BinXmlValue::StringArray(items) => json!(items),
            BinXmlValue::Int8Array(items) => json!(items),
            BinXmlValue::UInt8Array(items) => json!(items),
            BinXmlValue::Int16Array(items) => json!(items),
            BinXmlValue::UInt16Array(items) => json!(items),
            BinXmlValue::Int32Array(items) => json!(items),
            BinXmlValue::UInt32Array(items) => json!(items),
            BinXmlValue::Int64Array(items) => json!(items),
            BinXmlValue::UInt64Array(items) => json!(items),
            BinXmlValue::Real32Array(items) => json!(items),
            BinXmlValue::Real64Array(items) => json!(items),
            BinXmlValue::BoolArray(items) => json!(items),
            BinXmlValue::GuidArray(items) => {
                json!(items.iter().map(Guid::to_string).collect::<Vec<String>>())
            }
            BinXmlValue::FileTimeArray(items) => {
                json!(items.iter().map(format_timestamp).collect::<Vec<String>>())
            }
            BinXmlValue::HexInt32Array(items) => json!(
                items
                    .iter()
                    .map(|v| format!("0x{v:x}"))
                    .collect::<Vec<String>>()
            ),
            BinXmlValue::HexInt64Array(items) => json!(
                items
                    .iter()
                    .map(|v| format!("0x{v:x}"))
                    .collect::<Vec<String>>()
            ),
            BinXmlValue::SidArray(items) => json!(items),
            BinXmlValue::Raw(bytes) => json!(to_hex_string(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding::all::WINDOWS_1252;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decodes_sized_string_substitution() {
        let data: Vec<u8> = "logon".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut cursor = BinCursor::new(&data);

        let value = BinXmlValue::deserialize_value_type(
            &BinXmlValueType::String,
            &mut cursor,
            None,
            Some(data.len() as u16),
            WINDOWS_1252,
        )
        .unwrap();

        assert_eq!(value, BinXmlValue::String("logon".to_string()));
    }

    #[test]
    fn test_unknown_sized_type_degrades_to_raw() {
        let data = [0xde, 0xad, 0xbe, 0xef];
        let mut cursor = BinCursor::new(&data);

        let value = BinXmlValue::deserialize_value_type(
            &BinXmlValueType::EvtHandle,
            &mut cursor,
            None,
            Some(4),
            WINDOWS_1252,
        )
        .unwrap();

        assert_eq!(value, BinXmlValue::Raw(&data));
        assert_eq!(value.as_cow_str(), "DEADBEEF");
    }

    #[test]
    fn test_decodes_sid() {
        // S-1-5-21-1-2 : revision 1, 3 sub-authorities would be 21,1,2
        let mut data = vec![0x01, 0x03, 0, 0, 0, 0, 0, 0x05];
        data.extend(21u32.to_le_bytes());
        data.extend(1u32.to_le_bytes());
        data.extend(2u32.to_le_bytes());

        let mut cursor = BinCursor::new(&data);
        let value = BinXmlValue::deserialize_value_type(
            &BinXmlValueType::Sid,
            &mut cursor,
            None,
            Some(data.len() as u16),
            WINDOWS_1252,
        )
        .unwrap();

        assert_eq!(value, BinXmlValue::Sid("S-1-5-21-1-2".to_string()));
    }

    #[test]
    fn test_decodes_string_array() {
        let mut data: Vec<u8> = Vec::new();
        for s in ["alpha", "beta"] {
            data.extend(s.encode_utf16().flat_map(u16::to_le_bytes));
            data.extend([0, 0]);
        }

        let mut cursor = BinCursor::new(&data);
        let value = BinXmlValue::deserialize_value_type(
            &BinXmlValueType::StringArray,
            &mut cursor,
            None,
            Some(data.len() as u16),
            WINDOWS_1252,
        )
        .unwrap();

        assert_eq!(
            value,
            BinXmlValue::StringArray(vec!["alpha".to_string(), "beta".to_string()])
        );
    }

    #[test]
    fn test_irregular_bool_values_are_tolerated() {
        let data = 0x2au32.to_le_bytes();
        let mut cursor = BinCursor::new(&data);

        let value = BinXmlValue::deserialize_value_type(
            &BinXmlValueType::Bool,
            &mut cursor,
            None,
            Some(4),
            WINDOWS_1252,
        )
        .unwrap();

        assert_eq!(value, BinXmlValue::Bool(true));
    }
}
