use crate::ChunkOffset;
use crate::cursor::BinCursor;
use crate::err::DeserializationResult;

use std::fmt;

/// The link record preceding every cached name: a pointer to the next name
/// in the same hash bucket, and the name's hash.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct BinXmlNameLink {
    pub next_string: Option<ChunkOffset>,
}

impl BinXmlNameLink {
    pub(crate) fn from_cursor(cursor: &mut BinCursor<'_>) -> DeserializationResult<Self> {
        let next_string = cursor.u32("next string offset")?;
        let _name_hash = cursor.u16("name hash")?;

        Ok(BinXmlNameLink {
            next_string: if next_string > 0 {
                Some(next_string)
            } else {
                None
            },
        })
    }
}

/// An element or attribute name: a UTF-16 string stored once per chunk and
/// referenced by offset thereafter.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlName {
    name: String,
    /// Size on disk of the whole name structure (link + length + string +
    /// terminator), used to skip an inline occurrence of an already-cached
    /// name.
    data_size: u32,
}

impl BinXmlName {
    /// Parses a full name structure (link record, then a length-prefixed,
    /// NUL-terminated UTF-16 string) at the cursor position.
    pub(crate) fn from_cursor(
        cursor: &mut BinCursor<'_>,
    ) -> DeserializationResult<(BinXmlNameLink, BinXmlName)> {
        let start = cursor.pos();
        let link = BinXmlNameLink::from_cursor(cursor)?;
        let name = cursor.len_prefixed_utf16(true, "name string")?;
        let data_size = (cursor.pos() - start) as u32;

        Ok((link, BinXmlName { name, data_size }))
    }

    #[cfg(test)]
    pub(crate) fn from_str(s: &str) -> Self {
        // link (6) + length prefix (2) + UTF-16 payload + NUL terminator (2)
        let data_size = (6 + 2 + s.encode_utf16().count() * 2 + 2) as u32;
        BinXmlName {
            name: s.to_string(),
            data_size,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub(crate) fn data_size(&self) -> u32 {
        self.data_size
    }
}

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_name_structure() {
        let mut data = vec![
            0x00, 0x00, 0x00, 0x00, // next string
            0x34, 0x12, // hash
            0x04, 0x00, // 4 characters
        ];
        data.extend("Name".encode_utf16().flat_map(u16::to_le_bytes));
        data.extend([0x00, 0x00]); // terminator

        let mut cursor = BinCursor::new(&data);
        let (link, name) = BinXmlName::from_cursor(&mut cursor).unwrap();

        assert_eq!(link.next_string, None);
        assert_eq!(name.as_str(), "Name");
        assert_eq!(name.data_size() as usize, data.len());
        assert_eq!(cursor.pos(), data.len());
    }
}
