use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::decode_utf16le_units;

use winstructs::guid::Guid;

/// A bounds-checked little-endian cursor over an immutable byte slice.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>` for hot-path
/// parsing where the data is already in memory and we want explicit offset
/// control without IO-style error plumbing.
///
/// Every read either advances the position past what it consumed, or fails
/// with [`DeserializationError::Truncated`] and leaves the position exactly
/// where it was. There is no partial consumption.
#[derive(Clone, Copy, Debug)]
pub struct BinCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BinCursor { buf, pos: 0 }
    }

    /// Positions the cursor at `pos`. `pos == buf.len()` (EOF) is allowed.
    pub fn with_pos(buf: &'a [u8], pos: usize) -> DeserializationResult<Self> {
        let mut cursor = BinCursor { buf, pos: 0 };
        cursor.seek(pos, "cursor start position")?;
        Ok(cursor)
    }

    #[inline]
    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Position as `u64`, for error reporting.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn seek(&mut self, pos: usize, what: &'static str) -> DeserializationResult<()> {
        if pos > self.buf.len() {
            return Err(self.truncated_at(what, pos, 0));
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    pub fn skip(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let target = self
            .pos
            .checked_add(n)
            .ok_or_else(|| self.truncated(what, n))?;
        self.seek(target, what)
    }

    #[inline]
    pub fn take_bytes(&mut self, len: usize, what: &'static str) -> DeserializationResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| self.truncated(what, len))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| self.truncated(what, len))?;
        self.pos = end;
        Ok(slice)
    }

    #[inline]
    pub fn array<const N: usize>(&mut self, what: &'static str) -> DeserializationResult<[u8; N]> {
        let slice = self.take_bytes(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    #[inline]
    pub fn u8(&mut self, what: &'static str) -> DeserializationResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| self.truncated(what, 1))?;
        self.pos += 1;
        Ok(b)
    }

    #[inline]
    pub fn i8(&mut self, what: &'static str) -> DeserializationResult<i8> {
        Ok(self.u8(what)? as i8)
    }

    #[inline]
    pub fn u16(&mut self, what: &'static str) -> DeserializationResult<u16> {
        Ok(u16::from_le_bytes(self.array::<2>(what)?))
    }

    #[inline]
    pub fn i16(&mut self, what: &'static str) -> DeserializationResult<i16> {
        Ok(i16::from_le_bytes(self.array::<2>(what)?))
    }

    #[inline]
    pub fn u32(&mut self, what: &'static str) -> DeserializationResult<u32> {
        Ok(u32::from_le_bytes(self.array::<4>(what)?))
    }

    #[inline]
    pub fn i32(&mut self, what: &'static str) -> DeserializationResult<i32> {
        Ok(i32::from_le_bytes(self.array::<4>(what)?))
    }

    #[inline]
    pub fn u64(&mut self, what: &'static str) -> DeserializationResult<u64> {
        Ok(u64::from_le_bytes(self.array::<8>(what)?))
    }

    #[inline]
    pub fn i64(&mut self, what: &'static str) -> DeserializationResult<i64> {
        Ok(i64::from_le_bytes(self.array::<8>(what)?))
    }

    #[inline]
    pub fn f32(&mut self, what: &'static str) -> DeserializationResult<f32> {
        Ok(f32::from_le_bytes(self.array::<4>(what)?))
    }

    #[inline]
    pub fn f64(&mut self, what: &'static str) -> DeserializationResult<f64> {
        Ok(f64::from_le_bytes(self.array::<8>(what)?))
    }

    /// Reads a 16-byte GUID (mixed-endian layout handled by `winstructs`).
    pub fn guid(&mut self) -> DeserializationResult<Guid> {
        let offset = self.position();
        let bytes = self.take_bytes(16, "guid")?;
        Guid::from_buffer(bytes).map_err(|_| DeserializationError::InvalidGuid { offset })
    }

    /// Reads a raw FILETIME (100ns ticks since 1601-01-01).
    #[inline]
    pub fn filetime(&mut self) -> DeserializationResult<u64> {
        self.u64("filetime")
    }

    /// Reads `chars` UTF-16 code units and decodes them.
    ///
    /// Decoding stops at an embedded NUL; the cursor still advances past
    /// the full declared span.
    pub fn utf16_by_char_count(
        &mut self,
        chars: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let offset = self.position();
        let raw = self.take_bytes(
            chars.checked_mul(2).ok_or_else(|| self.truncated(what, usize::MAX))?,
            what,
        )?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();

        decode_utf16le_units(&units)
            .ok_or(DeserializationError::FailedToDecodeUtf16String { offset })
    }

    /// Reads a `u16` character count followed by that many UTF-16 code
    /// units, optionally consuming a trailing NUL terminator.
    pub fn len_prefixed_utf16(
        &mut self,
        is_null_terminated: bool,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let start = self.pos;
        let chars = self.u16(what)?;
        let result = (|| {
            let s = self.utf16_by_char_count(usize::from(chars), what)?;
            if is_null_terminated {
                self.u16(what)?;
            }
            Ok(s)
        })();

        // Restore the pre-read position so a failed read consumes nothing.
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    /// Reads UTF-16 code units until a NUL terminator (consumed).
    pub fn null_terminated_utf16(&mut self, what: &'static str) -> DeserializationResult<String> {
        let start = self.pos;
        let offset = self.position();
        let mut units = Vec::new();

        loop {
            match self.u16(what) {
                Ok(0) => break,
                Ok(unit) => units.push(unit),
                Err(e) => {
                    self.pos = start;
                    return Err(e);
                }
            }
        }

        match decode_utf16le_units(&units) {
            Some(s) => Ok(s),
            None => {
                self.pos = start;
                Err(DeserializationError::FailedToDecodeUtf16String { offset })
            }
        }
    }

    #[inline]
    fn truncated(&self, what: &'static str, need: usize) -> DeserializationError {
        DeserializationError::Truncated {
            what,
            offset: self.position(),
            need,
            have: self.remaining(),
        }
    }

    #[inline]
    fn truncated_at(&self, what: &'static str, target: usize, need: usize) -> DeserializationError {
        DeserializationError::Truncated {
            what,
            offset: target as u64,
            need,
            have: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reads_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut cursor = BinCursor::new(&data);

        assert_eq!(cursor.u16("t").unwrap(), 0x0201);
        assert_eq!(cursor.u32("t").unwrap(), 0x0605_0403);
        assert_eq!(cursor.pos(), 6);
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn test_failed_read_does_not_consume() {
        let data = [0xAA, 0xBB];
        let mut cursor = BinCursor::new(&data);
        cursor.u8("t").unwrap();

        assert!(cursor.u32("t").is_err());
        assert_eq!(cursor.pos(), 1, "position must be unchanged after a failed read");
        assert_eq!(cursor.u8("t").unwrap(), 0xBB);
    }

    #[test]
    fn test_seek_past_end_is_rejected() {
        let data = [0u8; 4];
        let mut cursor = BinCursor::new(&data);

        assert!(cursor.seek(4, "eof").is_ok(), "seeking to EOF is allowed");
        assert!(cursor.seek(5, "past eof").is_err());
        assert_eq!(cursor.pos(), 4);
    }

    #[test]
    fn test_len_prefixed_utf16() {
        // "Hi" with a length prefix of 2 characters and a NUL terminator.
        let data = [0x02, 0x00, b'H', 0x00, b'i', 0x00, 0x00, 0x00];
        let mut cursor = BinCursor::new(&data);

        let s = cursor.len_prefixed_utf16(true, "test string").unwrap();
        assert_eq!(s, "Hi");
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_truncated_utf16_restores_position() {
        // Declares 4 characters but only has one.
        let data = [0x04, 0x00, b'H', 0x00];
        let mut cursor = BinCursor::new(&data);

        assert!(cursor.len_prefixed_utf16(false, "test string").is_err());
        assert_eq!(cursor.pos(), 0);
    }

    #[test]
    fn test_null_terminated_utf16() {
        let data = [b'O', 0x00, b'k', 0x00, 0x00, 0x00, 0xFF, 0xFF];
        let mut cursor = BinCursor::new(&data);

        assert_eq!(cursor.null_terminated_utf16("t").unwrap(), "Ok");
        assert_eq!(cursor.pos(), 6);
    }
}
