/// Driver for reading iotop log files into a batch sink.
///
/// NOTE:
///
/// - Lines are processed strictly in file order and each sample becomes exactly one point, so
///   running the same input with the same options always produces the same points in the same
///   order.
///
/// - Lines that are not samples (totals, headers, blank lines, anything that does not start with a
///   time of day) are skipped silently; that is the normal case and not an error.
///
/// - A line that looks like a sample but can't be decoded is an error for that line.  By default
///   it is reported and skipped; in strict mode it terminates the run.  Either way nothing from
///   that line reaches the sink.
///
/// - Invalid UTF-8 is replaced, not rejected; iotop can print anything as a command name.

use crate::classify::{classify, LineClass};
use crate::error::ParseError;
use crate::extract::{extract_with_layout, FieldLayout};
use crate::point::{encode, MetricPoint};
use crate::sink::{BatchSink, PointWriter};
use crate::timestamp::{resolve, DEFAULT_OFFSET_SECONDS};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::AddAssign;
use std::path::Path;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// The calendar date of every line in the input.
    pub date: NaiveDate,

    /// Value of the `hostname` tag.
    pub hostname: String,

    /// Seconds subtracted from every timestamp.
    pub offset_seconds: i64,

    /// Abort on the first undecodable sample line instead of skipping it.
    pub strict: bool,

    pub layout: FieldLayout,
}

impl ParseOptions {
    pub fn new(date: NaiveDate, hostname: &str) -> ParseOptions {
        ParseOptions {
            date,
            hostname: hostname.to_string(),
            offset_seconds: DEFAULT_OFFSET_SECONDS,
            strict: false,
            layout: FieldLayout::default(),
        }
    }
}

/// Line counts for one or more inputs.  `lines == samples + skipped + errors`.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub lines: usize,
    pub samples: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl AddAssign for FileStats {
    fn add_assign(&mut self, rhs: FileStats) {
        self.lines += rhs.lines;
        self.samples += rhs.samples;
        self.skipped += rhs.skipped;
        self.errors += rhs.errors;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Skipped,
    Sample(MetricPoint),
    Failed(ParseError),
}

/// Run one line through classification, timestamp resolution, extraction and encoding.

pub fn process_line(line: &str, options: &ParseOptions) -> LineOutcome {
    if classify(line) == LineClass::Skip {
        return LineOutcome::Skipped;
    }
    let ts = match resolve(options.date, line, options.offset_seconds) {
        Ok(ts) => ts,
        Err(_) => return LineOutcome::Skipped,
    };
    match extract_with_layout(line, &options.layout) {
        Ok(record) => LineOutcome::Sample(encode(&record, ts, &options.hostname)),
        Err(e) => LineOutcome::Failed(e),
    }
}

/// Parse a log file and add its points to `sink`.  Returns an error if the file can't be opened
/// or read, if the sink fails to flush, or (in strict mode) on the first bad sample line.

pub fn parse_logfile<W: PointWriter>(
    file_name: &Path,
    options: &ParseOptions,
    sink: &mut BatchSink<W>,
) -> Result<FileStats> {
    let file = File::open(file_name)
        .with_context(|| format!("Could not open {}", file_name.display()))?;
    parse_lines(
        BufReader::new(file),
        &file_name.display().to_string(),
        options,
        sink,
    )
}

/// Like `parse_logfile`, but for any line source.  `source_name` is only used in messages.

pub fn parse_lines<R: BufRead, W: PointWriter>(
    mut reader: R,
    source_name: &str,
    options: &ParseOptions,
    sink: &mut BatchSink<W>,
) -> Result<FileStats> {
    let mut stats = FileStats::default();
    let mut buf = vec![];
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Could not read {source_name}"))?;
        if n == 0 {
            break;
        }
        stats.lines += 1;
        let line = String::from_utf8_lossy(&buf);
        match process_line(&line, options) {
            LineOutcome::Skipped => {
                trace!("{source_name}:{}: skipped", stats.lines);
                stats.skipped += 1;
            }
            LineOutcome::Sample(point) => {
                debug!("{point}");
                stats.samples += 1;
                sink.add(point)?;
            }
            LineOutcome::Failed(e) => {
                if options.strict {
                    bail!("{source_name}:{}: {e}", stats.lines);
                }
                warn!("{source_name}:{}: {e}", stats.lines);
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
use crate::sink::LineProtocolWriter;

#[cfg(test)]
fn options() -> ParseOptions {
    ParseOptions::new(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(), "host1")
}

#[cfg(test)]
fn run_file(file_name: &str, options: &ParseOptions, batch_size: usize) -> Result<(FileStats, String)> {
    let mut buf = Vec::<u8>::new();
    let mut sink = BatchSink::new(LineProtocolWriter::new(&mut buf), batch_size)?;
    let stats = parse_logfile(Path::new(file_name), options, &mut sink)?;
    sink.finish()?;
    Ok((stats, String::from_utf8(buf)?))
}

#[test]
fn test_parse_logfile() {
    let (stats, text) = run_file("../tests/iotoplog/iotop-sample.log", &options(), 2).unwrap();
    assert!(
        stats
            == FileStats {
                lines: 11,
                samples: 3,
                skipped: 7,
                errors: 1
            }
    );
    let expected = [
        "iotop,hostname=host1,user=root,command=[txg_sync] diskread=0.0,diskwrite=0.0,swapin=0.0,io=44.15 1682967877000000000",
        "iotop,hostname=host1,user=postgres,command=postgres: diskread=7.82,diskwrite=123.45,swapin=0.0,io=3.21 1682967877000000000",
        "iotop,hostname=host1,user=www-data,command=nginx: diskread=12.5,diskwrite=0.0,swapin=0.0,io=0.47 1682967878000000000",
    ];
    assert!(text.lines().collect::<Vec<&str>>() == expected);
}

#[test]
fn test_parse_logfile_pid_layout() {
    let (stats, text) = run_file("../tests/iotoplog/iotop-pid.log", &options(), 100).unwrap();
    assert!(stats.samples == 2);
    assert!(stats.skipped == 4);
    assert!(stats.errors == 0);
    assert!(text.lines().count() == 2);
    assert!(text.starts_with("iotop,hostname=host1,user=root,command=[kworker/u256:0-events_power_efficient] "));
}

#[test]
fn test_parse_is_repeatable() {
    let (_, a) = run_file("../tests/iotoplog/iotop-sample.log", &options(), 1).unwrap();
    let (_, b) = run_file("../tests/iotoplog/iotop-sample.log", &options(), 1000).unwrap();
    assert!(a == b);
}

#[test]
fn test_strict_mode() {
    let mut opts = options();
    opts.strict = true;
    let e = run_file("../tests/iotoplog/iotop-sample.log", &opts, 100).unwrap_err();
    let msg = e.to_string();
    assert!(msg.contains("iotop-sample.log:10:"));
    assert!(msg.contains("expected at least 13 fields, found 10"));

    // Strict mode is only about bad samples, not about junk lines.
    let (stats, _) = run_file("../tests/iotoplog/iotop-pid.log", &opts, 100).unwrap();
    assert!(stats.samples == 2);
}

#[test]
fn test_missing_file() {
    let e = run_file("../tests/iotoplog/nonesuch.log", &options(), 100).unwrap_err();
    assert!(e.to_string().contains("Could not open"));
}

#[test]
fn test_process_line() {
    let o = options();
    assert!(process_line("", &o) == LineOutcome::Skipped);
    assert!(process_line("\n", &o) == LineOutcome::Skipped);
    assert!(process_line("20:04:37 Total DISK READ: 0.00 B/s", &o) == LineOutcome::Skipped);
    assert!(matches!(
        process_line("20:04:37 1 be/4 root 0.00 B/s", &o),
        LineOutcome::Failed(_)
    ));
    // A time of day with blanks in it is not a time of day, so the line is junk, not a bad sample.
    assert!(process_line(" 2:04:37  911 be/4 root  0.00 B/s  0.00 B/s  0.00 %  1.00 % cmd", &o) == LineOutcome::Skipped);
    assert!(process_line("20:04: 7  911 be/4 root  0.00 B/s  0.00 B/s  0.00 %  1.00 % cmd", &o) == LineOutcome::Skipped);
    match process_line("20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]\n", &o) {
        LineOutcome::Sample(p) => assert!(p.timestamp.nanos() == 1682967877000000000),
        _ => panic!("Expected a sample"),
    }
}

#[test]
fn test_offset_option() {
    let mut o = options();
    o.offset_seconds = 0;
    match process_line("20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]", &o) {
        LineOutcome::Sample(p) => assert!(p.timestamp.nanos() == 1682971477000000000),
        _ => panic!("Expected a sample"),
    }
}

#[test]
fn test_invalid_utf8() {
    let input: &[u8] = b"20:04:37   911 be/4 root  0.00 B/s  0.00 B/s  0.00 %  1.00 % caf\xe9\n";
    let mut buf = Vec::<u8>::new();
    let mut sink = BatchSink::new(LineProtocolWriter::new(&mut buf), 10).unwrap();
    let stats = parse_lines(input, "stdin", &options(), &mut sink).unwrap();
    sink.finish().unwrap();
    assert!(stats.samples == 1);
    assert!(String::from_utf8(buf).unwrap().contains("command=caf\u{fffd} "));
}

#[test]
fn test_file_stats_sum() {
    let mut a = FileStats {
        lines: 3,
        samples: 1,
        skipped: 1,
        errors: 1,
    };
    a += FileStats {
        lines: 2,
        samples: 2,
        skipped: 0,
        errors: 0,
    };
    assert!(
        a == FileStats {
            lines: 5,
            samples: 3,
            skipped: 1,
            errors: 1
        }
    );
}

#[test]
fn test_crlf_file() {
    use std::io::Write;

    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"    TIME  TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND\r\n")
        .unwrap();
    f.write_all(b"20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]\r\n")
        .unwrap();
    f.flush().unwrap();
    let (stats, text) = run_file(&f.path().to_string_lossy(), &options(), 10).unwrap();
    assert!(stats.samples == 1 && stats.skipped == 1);
    assert!(text.ends_with(" 1682967877000000000\n"));
    assert!(text.contains("command=[txg_sync] "));
}
