/// Coarse line classification.
///
/// `iotop -b -t` interleaves the per-process sample lines with two lines of system-wide totals per
/// iteration, and repeats the column header now and then.  The totals carry a timestamp just like
/// the samples do, so they have to be recognized by content.  Headers, blank lines and other junk
/// do not start with a time of day and are weeded out later, when the timestamp fails to resolve.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Skip,
    Sample,
}

/// Markers of the system-wide totals lines.  Different iotop versions use "Actual" or "Current"
/// for the second line.

pub const SUMMARY_MARKERS: [&str; 3] = ["Total DISK READ", "Actual DISK READ", "Current DISK READ"];

pub fn classify(line: &str) -> LineClass {
    if SUMMARY_MARKERS.iter().any(|m| line.contains(m)) {
        LineClass::Skip
    } else {
        LineClass::Sample
    }
}

#[test]
fn test_classify() {
    assert!(
        classify("20:04:37 Total DISK READ:         0.00 B/s | Total DISK WRITE:         0.00 B/s")
            == LineClass::Skip
    );
    assert!(classify("Total DISK READ") == LineClass::Skip);
    assert!(classify("Total DISK READ and then some garbage 1 2 3") == LineClass::Skip);
    assert!(
        classify("20:04:37 Actual DISK READ:        0.00 B/s | Actual DISK WRITE:        0.00 B/s")
            == LineClass::Skip
    );
    assert!(
        classify("19:03:55 Current DISK READ:       0.00 B/s | Current DISK WRITE:       0.00 B/s")
            == LineClass::Skip
    );
    assert!(
        classify("20:04:37   911 be/4 root        0.00 B/s    0.00 B/s  0.00 % 44.15 % [txg_sync]")
            == LineClass::Sample
    );
    // Case matters, and so does the full marker.
    assert!(classify("20:04:37 total disk read") == LineClass::Sample);
    assert!(classify("20:04:37 Total DISK WRITE: 1.00 B/s") == LineClass::Sample);
    // Headers are not weeded out here.
    assert!(classify("    TIME  TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND")
        == LineClass::Sample);
}
