// SPDX-License-Identifier: Apache-2.0 OR MIT
// Cached-date builder for the 28-byte local timestamp prefix

use chrono::{Local, Offset, TimeZone, Timelike};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the rendered stamp `YYYY-MM-DDThh:mm:ss.mmm+ZZZZ`
pub const TIMESTAMP_LEN: usize = 28;

const SECS_PER_DAY: i64 = 86_400;

/// Builds textual timestamps like `2015-07-15T14:53:51.979+0200` quickly.
///
/// Calendar math is the expensive part, so the date string, the timezone
/// string and the unix second of local midnight are cached; within one local
/// day a [`format`] call only reads the system clock and renders digits. The
/// cache is recomputed under an internal lock when the clock leaves the
/// cached day.
///
/// [`format`]: TimeKeeper::format
pub struct TimeKeeper {
    cache: Mutex<DayCache>,
}

struct DayCache {
    /// Unix time of today's local midnight; 0 forces a recompute
    day_start: i64,
    date: [u8; 10],
    tz: [u8; 5],
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(DayCache {
                day_start: 0,
                date: [0; 10],
                tz: [0; 5],
            }),
        }
    }

    /// Render the current local time into `buf`.
    pub fn format(&self, buf: &mut [u8; TIMESTAMP_LEN]) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs() as i64;
        let millis = now.subsec_millis();

        let mut cache = self.cache.lock().unwrap();
        if cache.day_start == 0 || secs < cache.day_start || secs - cache.day_start >= SECS_PER_DAY
        {
            cache.recompute(secs);
        }

        let day_secs = (secs - cache.day_start) as u32;
        let (h, m, s) = (day_secs / 3600, day_secs / 60 % 60, day_secs % 60);

        buf[0..10].copy_from_slice(&cache.date);
        buf[10] = b'T';
        format_uint_decimal(&mut buf[11..13], h);
        buf[13] = b':';
        format_uint_decimal(&mut buf[14..16], m);
        buf[16] = b':';
        format_uint_decimal(&mut buf[17..19], s);
        buf[19] = b'.';
        format_uint_decimal(&mut buf[20..23], millis);
        buf[23..28].copy_from_slice(&cache.tz);
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl DayCache {
    fn recompute(&mut self, secs: i64) {
        let local = match Local.timestamp_opt(secs, 0) {
            chrono::LocalResult::Single(t) => t,
            // Ambiguous or missing around a DST shift: take either side
            chrono::LocalResult::Ambiguous(t, _) => t,
            chrono::LocalResult::None => Local.timestamp_opt(secs + 3600, 0).unwrap(),
        };

        let date = local.format("%Y-%m-%d").to_string();
        self.date.copy_from_slice(date.as_bytes());

        let offset_secs = local.offset().fix().local_minus_utc();
        let tz_minutes = offset_secs / 60;
        self.tz[0] = if tz_minutes < 0 { b'-' } else { b'+' };
        let abs = tz_minutes.unsigned_abs();
        format_uint_decimal(&mut self.tz[1..3], abs / 60);
        format_uint_decimal(&mut self.tz[3..5], abs % 60);

        self.day_start = secs - local.num_seconds_from_midnight() as i64;
    }
}

/// Write `v` into `buf` as zero-padded decimal, exactly `buf.len()` digits.
/// High digits beyond the field width are discarded.
pub fn format_uint_decimal(buf: &mut [u8], mut v: u32) {
    for b in buf.iter_mut().rev() {
        *b = b'0' + (v % 10) as u8;
        v /= 10;
    }
}

/// Write `v` into `buf` as zero-padded lowercase hex, exactly `buf.len()`
/// digits.
pub fn format_uint_hex(buf: &mut [u8], mut v: u32) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    for b in buf.iter_mut().rev() {
        *b = DIGITS[(v & 0xF) as usize];
        v >>= 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_padding() {
        let mut buf = [0u8; 3];
        format_uint_decimal(&mut buf, 7);
        assert_eq!(&buf, b"007");
        format_uint_decimal(&mut buf, 979);
        assert_eq!(&buf, b"979");
        // Overflow keeps only the low digits
        format_uint_decimal(&mut buf, 12345);
        assert_eq!(&buf, b"345");
    }

    #[test]
    fn test_hex_padding() {
        let mut buf = [0u8; 8];
        format_uint_hex(&mut buf, 0x1fdc);
        assert_eq!(&buf, b"00001fdc");
        format_uint_hex(&mut buf, 0xDEADBEEF);
        assert_eq!(&buf, b"deadbeef");
    }

    #[test]
    fn test_stamp_shape() {
        let tk = TimeKeeper::new();
        let mut buf = [0u8; TIMESTAMP_LEN];
        tk.format(&mut buf);

        assert_eq!(buf[4], b'-');
        assert_eq!(buf[7], b'-');
        assert_eq!(buf[10], b'T');
        assert_eq!(buf[13], b':');
        assert_eq!(buf[16], b':');
        assert_eq!(buf[19], b'.');
        assert!(buf[23] == b'+' || buf[23] == b'-');
        for i in [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18, 20, 21, 22, 24, 25, 26, 27] {
            assert!(buf[i].is_ascii_digit(), "byte {i} is {:?}", buf[i] as char);
        }
    }

    #[test]
    fn test_stamp_matches_wall_clock() {
        let tk = TimeKeeper::new();
        let mut buf = [0u8; TIMESTAMP_LEN];

        let before = Local::now().format("%Y-%m-%dT%H:%M").to_string();
        tk.format(&mut buf);
        let after = Local::now().format("%Y-%m-%dT%H:%M").to_string();

        let stamp = std::str::from_utf8(&buf[..16]).unwrap();
        // Either snapshot may differ by one minute when taken across a tick
        assert!(
            stamp == before || stamp == after,
            "stamp {stamp} not in [{before}, {after}]"
        );
    }

    #[test]
    fn test_repeated_stamps_share_date() {
        let tk = TimeKeeper::new();
        let mut a = [0u8; TIMESTAMP_LEN];
        let mut b = [0u8; TIMESTAMP_LEN];
        tk.format(&mut a);
        tk.format(&mut b);
        assert_eq!(&a[0..10], &b[0..10]);
        assert_eq!(&a[23..28], &b[23..28]);
    }
}
