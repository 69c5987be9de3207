/// Metric points and their line-protocol encoding.
///
/// A point renders as
///
///   iotop,hostname=H,user=U,command=C diskread=R,diskwrite=W,swapin=S,io=I NANOS
///
/// with the tags and fields always present and always in that order.  Field values are printed as
/// plain decimals that always contain a '.', so that the database types them as floats from the
/// first point on.  Tag values are escaped the line-protocol way.

use crate::extract::SampleRecord;
use crate::timestamp::ResolvedTimestamp;

use std::fmt;

pub const MEASUREMENT: &str = "iotop";

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub measurement: &'static str,
    pub tags: [(&'static str, String); 3],
    pub fields: [(&'static str, f64); 4],
    pub timestamp: ResolvedTimestamp,
}

/// Build the point for one sample.  The process ID, priority and full command line are not
/// carried; the tag set would otherwise grow without bound.

pub fn encode(record: &SampleRecord, ts: ResolvedTimestamp, hostname: &str) -> MetricPoint {
    MetricPoint {
        measurement: MEASUREMENT,
        tags: [
            ("hostname", hostname.to_string()),
            ("user", record.user.to_string()),
            ("command", record.command.to_string()),
        ],
        fields: [
            ("diskread", record.disk_read),
            ("diskwrite", record.disk_write),
            ("swapin", record.swapin),
            ("io", record.io),
        ],
        timestamp: ts,
    }
}

impl fmt::Display for MetricPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.measurement)?;
        for (k, v) in &self.tags {
            write!(f, ",{k}=")?;
            write_tag_value(f, v)?;
        }
        let mut sep = " ";
        for (k, v) in &self.fields {
            write!(f, "{sep}{k}={}", format_float(*v))?;
            sep = ",";
        }
        write!(f, " {}", self.timestamp.nanos())
    }
}

// Comma, equals and space would end the tag value early, and so would a backslash in front of
// one of them or at the very end.  An empty value is not allowed at all.
fn write_tag_value(f: &mut fmt::Formatter<'_>, v: &str) -> fmt::Result {
    if v.is_empty() {
        return f.write_str("_");
    }
    let mut chars = v.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ',' | '=' | ' ' => f.write_str("\\")?,
            '\\' if matches!(chars.peek(), None | Some(',' | '=' | ' ')) => f.write_str("\\")?,
            _ => {}
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

/// Format a float as a decimal literal that reads back as a float: 0 becomes "0.0", 44.15 stays
/// "44.15".

pub fn format_float(v: f64) -> String {
    let s = v.to_string();
    if !v.is_finite() || s.contains('.') {
        s
    } else {
        s + ".0"
    }
}

#[cfg(test)]
use chrono::NaiveDate;

#[cfg(test)]
fn point_for(line: &str, hostname: &str) -> MetricPoint {
    let date = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
    let ts = crate::timestamp::resolve(date, line, crate::timestamp::DEFAULT_OFFSET_SECONDS).unwrap();
    encode(&crate::extract::extract(line).unwrap(), ts, hostname)
}

#[test]
fn test_encode_txg_sync() {
    let p = point_for(
        "20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]",
        "host1",
    );
    assert!(
        p.to_string()
            == "iotop,hostname=host1,user=root,command=[txg_sync] diskread=0.0,diskwrite=0.0,swapin=0.0,io=44.15 1682967877000000000"
    );
}

#[test]
fn test_encode_order_and_values() {
    let p = point_for(
        "20:04:38  533559 be/4 www-data   12.50 M/s    3.00 B/s  1.00 %  0.47 % nginx: worker process",
        "web-1.example.org",
    );
    assert!(p.measurement == "iotop");
    assert!(p.tags.iter().map(|(k, _)| *k).collect::<Vec<_>>() == vec!["hostname", "user", "command"]);
    assert!(
        p.fields.iter().map(|(k, _)| *k).collect::<Vec<_>>()
            == vec!["diskread", "diskwrite", "swapin", "io"]
    );
    assert!(
        p.to_string()
            == "iotop,hostname=web-1.example.org,user=www-data,command=nginx: diskread=12.5,diskwrite=3.0,swapin=1.0,io=0.47 1682967878000000000"
    );
}

#[test]
fn test_tag_escaping() {
    let p = MetricPoint {
        measurement: MEASUREMENT,
        tags: [
            ("hostname", "my host".to_string()),
            ("user", "".to_string()),
            ("command", "a,b=c".to_string()),
        ],
        fields: [("diskread", 1.0), ("diskwrite", 0.0), ("swapin", 0.0), ("io", 0.0)],
        timestamp: ResolvedTimestamp::from_nanos(5),
    };
    assert!(
        p.to_string()
            == "iotop,hostname=my\\ host,user=_,command=a\\,b\\=c diskread=1.0,diskwrite=0.0,swapin=0.0,io=0.0 5"
    );
}

#[test]
fn test_tag_trailing_backslash() {
    let p = point_for(
        "20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 %  1.00 % cmd\\",
        "host1",
    );
    assert!(
        p.to_string()
            == "iotop,hostname=host1,user=root,command=cmd\\\\ diskread=0.0,diskwrite=0.0,swapin=0.0,io=1.0 1682967877000000000"
    );

    // Only a backslash that could swallow a separator is doubled.
    let p = MetricPoint {
        measurement: MEASUREMENT,
        tags: [
            ("hostname", "h".to_string()),
            ("user", "u".to_string()),
            ("command", "a\\b\\ c".to_string()),
        ],
        fields: [("diskread", 0.0), ("diskwrite", 0.0), ("swapin", 0.0), ("io", 0.0)],
        timestamp: ResolvedTimestamp::from_nanos(1),
    };
    assert!(
        p.to_string()
            == "iotop,hostname=h,user=u,command=a\\b\\\\\\ c diskread=0.0,diskwrite=0.0,swapin=0.0,io=0.0 1"
    );
}

#[test]
fn test_format_float() {
    assert!(format_float(0.0) == "0.0");
    assert!(format_float(44.15) == "44.15");
    assert!(format_float(100.0) == "100.0");
    assert!(format_float(0.47) == "0.47");
    assert!(format_float(123456789.0) == "123456789.0");
}
