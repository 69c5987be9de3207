/// An iotop log is the captured output of `iotop -b -t` (batch mode with timestamps): for every
/// sampling interval, two lines of system-wide totals followed by one line per process or thread
/// that did I/O in the interval, each prefixed with the time of day.  Column headers are repeated
/// now and then.  The log carries no date, so the date is supplied by the caller.
///
/// This library turns such logs into metric points in line protocol, ready for a time-series
/// database, by way of a small pipeline:
///
/// - classify each line, to get rid of the totals (`classify`)
/// - resolve the time of day against the date, which also weeds out headers and junk (`timestamp`)
/// - split the sample line into typed fields (`extract`)
/// - build the point for the sample (`point`)
/// - batch the points and hand them to a writer (`sink`)
///
/// The driver in `logfile` runs the pipeline over a file.  Everything is single-threaded and
/// strictly in input order.

mod classify;
mod error;
mod extract;
mod logfile;
mod point;
mod sink;
mod timestamp;

// Skip-or-sample decision for a raw line.

pub use classify::classify;
pub use classify::LineClass;
pub use classify::SUMMARY_MARKERS;

// Structured per-line parse error.

pub use error::ParseError;
pub use error::ParseErrorKind;

// The decoded contents of one sample line, and the token layout used to decode it.

pub use extract::collapse_spaces;
pub use extract::extract;
pub use extract::extract_with_layout;
pub use extract::FieldLayout;
pub use extract::SampleRecord;
pub use extract::IOTOP_LAYOUT;

// Date + time of day => nanoseconds since the epoch, less a fixed offset.

pub use timestamp::resolve;
pub use timestamp::time_of_day;
pub use timestamp::ResolvedTimestamp;
pub use timestamp::DEFAULT_OFFSET_SECONDS;

// Metric points and their line-protocol form (via Display).

pub use point::encode;
pub use point::format_float;
pub use point::MetricPoint;
pub use point::MEASUREMENT;

// Batching, and the writer interface the batches are sent to.

pub use sink::BatchSink;
pub use sink::LineProtocolWriter;
pub use sink::PointWriter;
pub use sink::SinkStats;

// Run the whole pipeline over a file or other line source.

pub use logfile::parse_lines;
pub use logfile::parse_logfile;
pub use logfile::process_line;
pub use logfile::FileStats;
pub use logfile::LineOutcome;
pub use logfile::ParseOptions;
