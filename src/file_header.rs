use crate::cursor::BinCursor;
use crate::err::{EvtxError, Result};

use bitflags::bitflags;

pub const EVTX_FILE_HEADER_SIZE: usize = 4096;

/// CRC32 of the file header covers its first 120 bytes (everything before
/// the flags field).
const FILE_HEADER_CHECKSUM_SPAN: usize = 120;

bitflags! {
    /// File header flags. Unknown bits are retained rather than rejected,
    /// since some writers set undocumented values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const DIRTY = 0x1;
        const FULL = 0x2;

        const _ = !0;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    /// A hint only. The chunk walk detects end-of-chunks by buffer
    /// exhaustion, so a wrong count cannot cause missed or duplicated
    /// chunks.
    pub chunk_count: u16,
    pub flags: HeaderFlags,
    pub checksum: u32,
}

impl EvtxFileHeader {
    /// Parses the 4096-byte file header region.
    ///
    /// A wrong magic is fatal for the whole file. A checksum mismatch is
    /// not checked here; see [`EvtxFileHeader::verify_checksum`].
    pub fn from_buf(buf: &[u8]) -> Result<EvtxFileHeader> {
        let mut cursor = BinCursor::new(buf);

        // The magic is checked before the length: a wrong magic is the
        // more precise diagnosis for a short non-EVTX file.
        let magic: [u8; 8] = cursor
            .array("file header magic")
            .map_err(|_| EvtxError::IncompleteFileHeader)?;
        if &magic != b"ElfFile\x00" {
            return Err(EvtxError::InvalidFileFormat { magic });
        }

        if buf.len() < EVTX_FILE_HEADER_SIZE {
            return Err(EvtxError::IncompleteFileHeader);
        }

        let first_chunk_number = cursor.u64("first chunk number")?;
        let last_chunk_number = cursor.u64("last chunk number")?;
        let next_record_id = cursor.u64("next record id")?;
        let header_size = cursor.u32("header size")?;
        let minor_version = cursor.u16("minor version")?;
        let major_version = cursor.u16("major version")?;
        let header_block_size = cursor.u16("header block size")?;
        let chunk_count = cursor.u16("chunk count")?;

        // Unused region between the fixed fields and the flags.
        cursor.skip(76, "file header padding")?;

        let flags = HeaderFlags::from_bits_retain(cursor.u32("file header flags")?);
        let checksum = cursor.u32("file header checksum")?;

        Ok(EvtxFileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            chunk_count,
            flags,
            checksum,
        })
    }

    /// Compares the stored CRC32 against the first 120 header bytes.
    ///
    /// A mismatch downgrades the header to a hint; it does not abort the
    /// file.
    pub fn verify_checksum(&self, buf: &[u8]) -> bool {
        if buf.len() < FILE_HEADER_CHECKSUM_SPAN {
            return false;
        }
        crc32fast::hash(&buf[..FILE_HEADER_CHECKSUM_SPAN]) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn build_header(magic: &[u8; 8], chunk_count: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EVTX_FILE_HEADER_SIZE);
        buf.write_all(magic).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap(); // first chunk
        buf.write_u64::<LittleEndian>(u64::from(chunk_count) - 1).unwrap();
        buf.write_u64::<LittleEndian>(100).unwrap(); // next record id
        buf.write_u32::<LittleEndian>(128).unwrap(); // header size
        buf.write_u16::<LittleEndian>(1).unwrap(); // minor
        buf.write_u16::<LittleEndian>(3).unwrap(); // major
        buf.write_u16::<LittleEndian>(4096).unwrap(); // block size
        buf.write_u16::<LittleEndian>(chunk_count).unwrap();
        buf.resize(120, 0);
        buf.write_u32::<LittleEndian>(HeaderFlags::DIRTY.bits()).unwrap();
        let checksum = crc32fast::hash(&buf[..120]);
        buf.write_u32::<LittleEndian>(checksum).unwrap();
        buf.resize(EVTX_FILE_HEADER_SIZE, 0);
        buf
    }

    #[test]
    fn test_parses_file_header() {
        let buf = build_header(b"ElfFile\x00", 3);
        let header = EvtxFileHeader::from_buf(&buf).unwrap();

        assert_eq!(header.chunk_count, 3);
        assert_eq!(header.major_version, 3);
        assert_eq!(header.header_block_size, 4096);
        assert_eq!(header.flags, HeaderFlags::DIRTY);
        assert!(header.verify_checksum(&buf));
    }

    #[test]
    fn test_wrong_magic_is_fatal() {
        let buf = build_header(b"NotEvtx\x00", 1);

        match EvtxFileHeader::from_buf(&buf) {
            Err(EvtxError::InvalidFileFormat { magic }) => assert_eq!(&magic, b"NotEvtx\x00"),
            other => panic!("expected InvalidFileFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_checksum_mismatch_is_detected_but_not_fatal() {
        let mut buf = build_header(b"ElfFile\x00", 1);
        buf[30] ^= 0xFF;

        let header = EvtxFileHeader::from_buf(&buf).unwrap();
        assert!(!header.verify_checksum(&buf));
    }

    #[test]
    fn test_short_buffer_with_a_valid_magic() {
        assert!(matches!(
            EvtxFileHeader::from_buf(b"ElfFile\x00"),
            Err(EvtxError::IncompleteFileHeader)
        ));
    }

    #[test]
    fn test_garbage_buffer_reports_wrong_magic() {
        assert!(matches!(
            EvtxFileHeader::from_buf(&[0xAB; 100]),
            Err(EvtxError::InvalidFileFormat { .. })
        ));
    }
}
