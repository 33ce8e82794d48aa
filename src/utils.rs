use jiff::Timestamp;
use log::warn;

/// Microseconds between 1601-01-01 (the FILETIME epoch) and 1970-01-01.
const EPOCH_DELTA_MICROSECONDS: i64 = 11_644_473_600_000_000;

/// Decodes UTF-16LE code units into a `String`.
///
/// Decoding stops at the first NUL unit (EVTX strings are frequently
/// padded). Returns `None` on unpaired surrogates.
pub(crate) fn decode_utf16le_units(units: &[u16]) -> Option<String> {
    let meaningful = units.iter().position(|&u| u == 0).unwrap_or(units.len());

    char::decode_utf16(units[..meaningful].iter().copied())
        .collect::<Result<String, _>>()
        .ok()
}

/// Converts a raw FILETIME (100ns ticks since 1601-01-01) to a timestamp.
///
/// Zero means "no timestamp recorded" and maps to `None`, as do values
/// outside the representable range (seen in corrupted records).
pub(crate) fn filetime_to_timestamp(filetime: u64) -> Option<Timestamp> {
    if filetime == 0 {
        return None;
    }

    let micros_since_windows_epoch = (filetime / 10) as i64;
    let micros = micros_since_windows_epoch.checked_sub(EPOCH_DELTA_MICROSECONDS)?;

    match Timestamp::from_microsecond(micros) {
        Ok(ts) => Some(ts),
        Err(_) => {
            warn!("FILETIME value {filetime} is out of range, dropping timestamp");
            None
        }
    }
}

/// Formats a timestamp as UTC RFC 3339 with microsecond precision,
/// matching EVTX JSON conventions.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.strftime("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decodes_and_stops_at_nul() {
        let units: Vec<u16> = "Event".encode_utf16().chain([0, 0x2a]).collect();
        assert_eq!(decode_utf16le_units(&units).unwrap(), "Event");
    }

    #[test]
    fn test_rejects_unpaired_surrogate() {
        assert!(decode_utf16le_units(&[0xd800, b'x' as u16]).is_none());
    }

    #[test]
    fn test_filetime_conversion() {
        // 2020-01-01T00:00:00Z in FILETIME ticks.
        let filetime = 132_223_104_000_000_000_u64;
        let ts = filetime_to_timestamp(filetime).unwrap();
        assert_eq!(format_timestamp(&ts), "2020-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_zero_filetime_is_absent() {
        assert_eq!(filetime_to_timestamp(0), None);
    }
}
