/// Batching of points on their way to the database.
///
/// The `BatchSink` owns the pending batch and hands it to a `PointWriter` whenever it fills up, and
/// once more at the end.  Writers are injected, so the same pipeline can write to the database, to
/// stdout, or to a test double.  Nothing is retried here: a failed write is returned to the caller
/// and the batch is kept.

use crate::point::MetricPoint;

use anyhow::{bail, Result};
use std::io;
use tracing::debug;

/// Something that accepts a batch of points in one operation.

pub trait PointWriter {
    fn write_points(&mut self, points: &[MetricPoint]) -> Result<()>;
}

impl<W: PointWriter + ?Sized> PointWriter for &mut W {
    fn write_points(&mut self, points: &[MetricPoint]) -> Result<()> {
        (**self).write_points(points)
    }
}

impl<W: PointWriter + ?Sized> PointWriter for Box<W> {
    fn write_points(&mut self, points: &[MetricPoint]) -> Result<()> {
        (**self).write_points(points)
    }
}

/// Writes points as line protocol, one per line, to any byte sink.

pub struct LineProtocolWriter<W: io::Write> {
    out: W,
}

impl<W: io::Write> LineProtocolWriter<W> {
    pub fn new(out: W) -> LineProtocolWriter<W> {
        LineProtocolWriter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: io::Write> PointWriter for LineProtocolWriter<W> {
    fn write_points(&mut self, points: &[MetricPoint]) -> Result<()> {
        for p in points {
            writeln!(self.out, "{p}")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub points: usize,
    pub batches: usize,
}

pub struct BatchSink<W: PointWriter> {
    writer: W,
    batch: Vec<MetricPoint>,
    batch_size: usize,
    stats: SinkStats,
}

impl<W: PointWriter> BatchSink<W> {
    pub fn new(writer: W, batch_size: usize) -> Result<BatchSink<W>> {
        if batch_size == 0 {
            bail!("Batch size must be at least 1");
        }
        Ok(BatchSink {
            writer,
            batch: Vec::with_capacity(batch_size.min(65536)),
            batch_size,
            stats: SinkStats::default(),
        })
    }

    /// Queue a point, and flush if the batch is now full.

    pub fn add(&mut self, point: MetricPoint) -> Result<()> {
        self.batch.push(point);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Send whatever is pending as one write.  An empty batch is not sent.

    pub fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} points", self.batch.len());
        self.writer.write_points(&self.batch)?;
        self.stats.points += self.batch.len();
        self.stats.batches += 1;
        self.batch.clear();
        Ok(())
    }

    /// Flush the remainder and return the totals.  The writer is dropped.

    pub fn finish(mut self) -> Result<SinkStats> {
        self.flush()?;
        Ok(self.stats)
    }

    /// Number of points waiting for the next flush.

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }
}

#[cfg(test)]
use crate::timestamp::ResolvedTimestamp;

#[cfg(test)]
fn test_point(n: i64) -> MetricPoint {
    MetricPoint {
        measurement: crate::point::MEASUREMENT,
        tags: [
            ("hostname", "h".to_string()),
            ("user", "u".to_string()),
            ("command", "c".to_string()),
        ],
        fields: [("diskread", 0.0), ("diskwrite", 0.0), ("swapin", 0.0), ("io", 0.0)],
        timestamp: ResolvedTimestamp::from_nanos(n),
    }
}

// Records every write as the list of timestamps in it, and can be told to fail.
#[cfg(test)]
#[derive(Default)]
struct RecordingWriter {
    writes: Vec<Vec<i64>>,
    fail: bool,
}

#[cfg(test)]
impl PointWriter for RecordingWriter {
    fn write_points(&mut self, points: &[MetricPoint]) -> Result<()> {
        if self.fail {
            bail!("Connection refused");
        }
        self.writes
            .push(points.iter().map(|p| p.timestamp.nanos()).collect());
        Ok(())
    }
}

#[test]
fn test_batching() {
    let mut w = RecordingWriter::default();
    let mut sink = BatchSink::new(&mut w, 2).unwrap();
    for n in 1..=5 {
        sink.add(test_point(n)).unwrap();
    }
    assert!(sink.pending() == 1);
    assert!(sink.stats() == SinkStats { points: 4, batches: 2 });
    let stats = sink.finish().unwrap();
    assert!(stats == SinkStats { points: 5, batches: 3 });
    assert!(w.writes == vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[test]
fn test_empty_flush() {
    let mut w = RecordingWriter::default();
    let mut sink = BatchSink::new(&mut w, 10).unwrap();
    sink.flush().unwrap();
    let stats = sink.finish().unwrap();
    assert!(stats == SinkStats::default());
    assert!(w.writes.is_empty());
}

#[test]
fn test_zero_batch_size() {
    let w = RecordingWriter::default();
    assert!(BatchSink::new(w, 0).is_err());
}

#[test]
fn test_failed_flush_keeps_batch() {
    let mut w = RecordingWriter {
        fail: true,
        ..Default::default()
    };
    let mut sink = BatchSink::new(&mut w, 3).unwrap();
    sink.add(test_point(1)).unwrap();
    sink.add(test_point(2)).unwrap();
    assert!(sink.add(test_point(3)).is_err());
    assert!(sink.pending() == 3);
    assert!(sink.stats() == SinkStats::default());
}

#[test]
fn test_line_protocol_writer() {
    let mut buf = Vec::<u8>::new();
    let mut sink = BatchSink::new(LineProtocolWriter::new(&mut buf), 1).unwrap();
    sink.add(test_point(7)).unwrap();
    sink.add(test_point(8)).unwrap();
    assert!(sink.finish().unwrap().batches == 2);
    let text = String::from_utf8(buf).unwrap();
    assert!(
        text == "iotop,hostname=h,user=u,command=c diskread=0.0,diskwrite=0.0,swapin=0.0,io=0.0 7\n\
                 iotop,hostname=h,user=u,command=c diskread=0.0,diskwrite=0.0,swapin=0.0,io=0.0 8\n"
    );
}
