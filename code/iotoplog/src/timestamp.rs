/// Timestamp reconstruction.
///
/// Each iotop line starts with a time of day, `HH:MM:SS`, and nothing more; the date comes from
/// the command line.  The two are joined as `YYYY-MM-DDTHH:MM:SS` and parsed with exactly that
/// format, so anything else at the start of the line (headers, blank lines, a one-digit hour
/// followed by junk) fails, and the caller takes that to mean "not a sample line".
///
/// Quirk: a fixed offset, one hour by default, is subtracted from every timestamp.  The logs this
/// tool was first used on were written in a zone one hour ahead of the database's idea of time;
/// the offset is kept as a setting because nothing in the log itself says what zone it is in.  The
/// naive date and time are taken to be UTC before the offset is applied.

use crate::error::{ParseError, ParseErrorKind};

use chrono::{NaiveDate, NaiveDateTime};

pub const DEFAULT_OFFSET_SECONDS: i64 = 3600;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Nanoseconds since the Unix epoch.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedTimestamp(i64);

impl ResolvedTimestamp {
    pub fn from_nanos(nanos: i64) -> ResolvedTimestamp {
        ResolvedTimestamp(nanos)
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }
}

/// The time-of-day text at the start of the line: its first 8 characters, if there are that many.

pub fn time_of_day(line: &str) -> Option<&str> {
    line.get(0..8)
}

/// Resolve the time of day at the start of `line` against `date` and subtract `offset_seconds`.

pub fn resolve(
    date: NaiveDate,
    line: &str,
    offset_seconds: i64,
) -> Result<ResolvedTimestamp, ParseError> {
    let tod = match time_of_day(line) {
        Some(t) => t,
        None => return Err(ParseError::new(ParseErrorKind::BadTimeOfDay, line)),
    };
    // chrono skips blanks in front of numbers, so the exact HH:MM:SS shape is checked first.
    let well_formed = tod.bytes().enumerate().all(|(i, b)| {
        if i == 2 || i == 5 {
            b == b':'
        } else {
            b.is_ascii_digit()
        }
    });
    if !well_formed {
        return Err(ParseError::new(ParseErrorKind::BadTimeOfDay, line));
    }
    let text = format!("{}T{}", date.format("%Y-%m-%d"), tod);
    let t = match NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S") {
        Ok(t) => t,
        Err(_) => return Err(ParseError::new(ParseErrorKind::BadTimeOfDay, line)),
    };
    t.and_utc()
        .timestamp()
        .checked_sub(offset_seconds)
        .and_then(|secs| secs.checked_mul(NANOS_PER_SECOND))
        .map(ResolvedTimestamp)
        .ok_or_else(|| ParseError::new(ParseErrorKind::TimestampOutOfRange, line))
}

#[cfg(test)]
fn may_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 5, 1).unwrap()
}

#[test]
fn test_resolve() {
    // 2023-05-01T20:04:37Z is 1682971477.
    let t = resolve(may_day(), "20:04:37", DEFAULT_OFFSET_SECONDS).unwrap();
    assert!(t.nanos() == (1682971477 - 3600) * 1_000_000_000);
    assert!(t.nanos() == 1682967877000000000);

    let t = resolve(
        may_day(),
        "20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]",
        DEFAULT_OFFSET_SECONDS,
    )
    .unwrap();
    assert!(t == ResolvedTimestamp::from_nanos(1682967877000000000));

    let t = resolve(may_day(), "00:00:00", 0).unwrap();
    assert!(t.nanos() == 1682899200 * 1_000_000_000);

    // Early in the day the offset crosses into the previous date, that's fine.
    let t = resolve(may_day(), "00:30:00", DEFAULT_OFFSET_SECONDS).unwrap();
    assert!(t.nanos() == (1682899200 + 1800 - 3600) * 1_000_000_000);
}

#[test]
fn test_resolve_rejects() {
    let bad = [
        "",
        "20:04",
        "    TIME  TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND",
        "Total DISK READ:         0.00 B/s | Total DISK WRITE:         0.00 B/s",
        "24:00:00 x",
        "20-04-37 x",
        "2:04:37  x",
        "20:61:00 x",
        "ab:cd:ef x",
        " 2:04:37  911 be/4 root  0.00 B/s  0.00 B/s  0.00 %  1.00 % cmd",
        "20:04: 7  911 be/4 root  0.00 B/s  0.00 B/s  0.00 %  1.00 % cmd",
        "20: 4:37 x",
        "+2:04:37 x",
    ];
    for line in bad {
        let e = resolve(may_day(), line, DEFAULT_OFFSET_SECONDS).unwrap_err();
        assert!(e.kind == ParseErrorKind::BadTimeOfDay);
    }
}

#[test]
fn test_time_of_day() {
    assert!(time_of_day("20:04:37 rest") == Some("20:04:37"));
    assert!(time_of_day("short") == None);
    // Not a char boundary at 8.
    assert!(time_of_day("1234567\u{e5}x") == None);
}
