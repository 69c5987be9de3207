/// Field extraction for iotop sample lines.
///
/// iotop prints fixed-width columns, and there are two layouts in the wild, depending on whether
/// the second column holds a thread ID or a process ID:
///
/// ```text
///     TIME  TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND
/// 20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]
/// ```
///
/// ```text
///     TIME    PID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND
/// 19:03:55  533559 be/4 root        0.00 K/s    0.00 K/s  0.00 %  0.47 % [kworker/u256:0]
/// ```
///
/// The only difference is the width of the second column, so rather than cutting at offsets we
/// collapse runs of spaces and split on the single space that remains.  The token positions are
/// then the same for both layouts and are given by a `FieldLayout`.
///
/// The unit tokens following the rates ("B/s", "K/s", "M/s") are not interpreted: the value is
/// taken as printed, in whatever unit iotop chose for that line.

use crate::error::{ParseError, ParseErrorKind};

use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;
use ustr::Ustr;

/// The data from one sample line.  The numeric fields are never negative.

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// PID or TID, as text.
    pub process_id: String,

    /// I/O scheduling class and priority, eg "be/4".
    pub priority: Ustr,

    pub user: Ustr,

    pub disk_read: f64,
    pub disk_write: f64,

    /// Percent of time spent swapping in.
    pub swapin: f64,

    /// Percent of time spent waiting on I/O.
    pub io: f64,

    /// The first word of the command line.
    pub command: Ustr,

    /// The full command line, including `command`, single-space separated.
    pub command_args: String,
}

/// Token positions of the fields in a whitespace-collapsed sample line.  Token 0 is always the
/// time of day.  The command line runs from `command` to the end of the line.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub process_id: usize,
    pub priority: usize,
    pub user: usize,
    pub disk_read: usize,
    pub disk_write: usize,
    pub swapin: usize,
    pub io: usize,
    pub command: usize,
}

/// The layout of `iotop -b -t` output, both the TID and the PID variant.

pub const IOTOP_LAYOUT: FieldLayout = FieldLayout {
    process_id: 1,
    priority: 2,
    user: 3,
    disk_read: 4,
    disk_write: 6,
    swapin: 8,
    io: 10,
    command: 12,
};

impl FieldLayout {
    /// The number of tokens a line must have for every field to be present.

    pub fn min_tokens(&self) -> usize {
        [
            self.process_id,
            self.priority,
            self.user,
            self.disk_read,
            self.disk_write,
            self.swapin,
            self.io,
            self.command,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

impl Default for FieldLayout {
    fn default() -> FieldLayout {
        IOTOP_LAYOUT
    }
}

/// Replace every run of spaces with a single space and drop trailing whitespace (including the
/// newline).  Single spaces inside the command line are left alone.

pub fn collapse_spaces(line: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let re = SPACES.get_or_init(|| Regex::new(" {2,}").unwrap());
    re.replace_all(line.trim_end(), " ").into_owned()
}

/// Extract a sample record from a line that has been classified as a sample, using the standard
/// layout.

pub fn extract(line: &str) -> Result<SampleRecord, ParseError> {
    extract_with_layout(line, &IOTOP_LAYOUT)
}

pub fn extract_with_layout(line: &str, layout: &FieldLayout) -> Result<SampleRecord, ParseError> {
    let collapsed = collapse_spaces(line);
    let items = collapsed.split(' ').collect::<Vec<&str>>();
    let needed = layout.min_tokens();
    if items.len() < needed {
        return Err(ParseError::new(
            ParseErrorKind::TooFewFields {
                found: items.len(),
                needed,
            },
            line,
        ));
    }

    let number = |field: &'static str, ix: usize| -> Result<f64, ParseError> {
        get_f64(field, items[ix]).map_err(|kind| ParseError::new(kind, line))
    };

    Ok(SampleRecord {
        process_id: items[layout.process_id].to_string(),
        priority: Ustr::from(items[layout.priority]),
        user: Ustr::from(items[layout.user]),
        disk_read: number("diskread", layout.disk_read)?,
        disk_write: number("diskwrite", layout.disk_write)?,
        swapin: number("swapin", layout.swapin)?,
        io: number("io", layout.io)?,
        command: Ustr::from(items[layout.command]),
        command_args: items[layout.command..].join(" "),
    })
}

fn get_f64(field: &'static str, s: &str) -> Result<f64, ParseErrorKind> {
    match f64::from_str(s) {
        Ok(n) if n.is_finite() => {
            if n < 0.0 {
                Err(ParseErrorKind::NegativeNumber { field, value: n })
            } else {
                Ok(n)
            }
        }
        _ => Err(ParseErrorKind::BadNumber {
            field,
            token: s.to_string(),
        }),
    }
}

#[test]
fn test_collapse_spaces() {
    assert!(collapse_spaces("a b") == "a b");
    assert!(collapse_spaces("a  b") == "a b");
    assert!(collapse_spaces("a     b") == "a b");
    let wide = format!("a{}b", " ".repeat(137));
    assert!(collapse_spaces(&wide) == "a b");
    assert!(collapse_spaces("a  b   \n") == "a b");
    assert!(collapse_spaces("a  b \r\n") == "a b");
    // Tabs are not spaces here.
    assert!(collapse_spaces("a\t\tb") == "a\t\tb");
    assert!(
        collapse_spaces("20:04:37  1523 be/4 postgres    7.82 K/s  postgres: checkpointer")
            == "20:04:37 1523 be/4 postgres 7.82 K/s postgres: checkpointer"
    );
}

#[test]
fn test_min_tokens() {
    assert!(IOTOP_LAYOUT.min_tokens() == 13);
    assert!(FieldLayout::default() == IOTOP_LAYOUT);
}

#[test]
fn test_extract_tid_layout() {
    let r = extract("20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]\n")
        .unwrap();
    assert!(r.process_id == "911");
    assert!(r.priority.as_str() == "be/4");
    assert!(r.user.as_str() == "root");
    assert!(r.disk_read == 0.0);
    assert!(r.disk_write == 0.0);
    assert!(r.swapin == 0.0);
    assert!(r.io == 44.15);
    assert!(r.command.as_str() == "[txg_sync]");
    assert!(r.command_args == "[txg_sync]");
}

#[test]
fn test_extract_pid_layout() {
    let r = extract(
        "19:03:55  533559 be/4 root        1.50 K/s    2.25 K/s  0.10 %  0.47 % [kworker/u256:0-events_power_efficient]",
    )
    .unwrap();
    assert!(r.process_id == "533559");
    assert!(r.disk_read == 1.5);
    assert!(r.disk_write == 2.25);
    assert!(r.swapin == 0.1);
    assert!(r.io == 0.47);
    assert!(r.command.as_str() == "[kworker/u256:0-events_power_efficient]");
}

#[test]
fn test_extract_command_args() {
    let r = extract("20:04:37  1523 be/4 postgres    7.82 K/s  123.45 K/s  0.00 %  3.21 % postgres: checkpointer   ")
        .unwrap();
    assert!(r.user.as_str() == "postgres");
    assert!(r.disk_write == 123.45);
    assert!(r.command.as_str() == "postgres:");
    assert!(r.command_args == "postgres: checkpointer");

    let r = extract("20:04:37  1523 be/4 u  0.00 B/s  0.00 B/s  0.00 %  0.00 % python3  train.py   --epochs 3")
        .unwrap();
    assert!(r.command.as_str() == "python3");
    assert!(r.command_args == "python3 train.py --epochs 3");
}

#[test]
fn test_extract_errors() {
    let line = "20:04:38   912 be/4 root        0.00 B/s    0.00 B/s  ?unavailable?  [z_wr_iss]";
    let e = extract(line).unwrap_err();
    assert!(e.kind == ParseErrorKind::TooFewFields { found: 10, needed: 13 });
    assert!(e.line == line);

    let e = extract("20:04:37   911 be/4 root        x.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]")
        .unwrap_err();
    assert!(
        e.kind
            == ParseErrorKind::BadNumber {
                field: "diskread",
                token: "x.00".to_string()
            }
    );

    let e = extract("20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % -4.15 % [txg_sync]")
        .unwrap_err();
    assert!(e.kind == ParseErrorKind::NegativeNumber { field: "io", value: -4.15 });

    let e = extract("20:04:37   911 be/4 root        inf B/s    0.00 B/s  0.00 % 4.15 % [txg_sync]")
        .unwrap_err();
    assert!(matches!(e.kind, ParseErrorKind::BadNumber { field: "diskread", .. }));

    assert!(extract("").is_err());
}

#[test]
fn test_extract_custom_layout() {
    // A hypothetical variant without the SWAPIN column.
    let layout = FieldLayout {
        swapin: 8,
        io: 8,
        command: 10,
        ..IOTOP_LAYOUT
    };
    assert!(layout.min_tokens() == 11);
    let r = extract_with_layout("20:04:37 911 be/4 root 1.00 B/s 2.00 B/s 3.00 % cmd arg", &layout)
        .unwrap();
    assert!(r.io == 3.0);
    assert!(r.command_args == "cmd arg");
}
