/// Calendar dates as given on the command line.
///
/// The log files we read carry only a time of day on each line, so the calendar date is always
/// supplied by the user, as `YYYY-MM-DD`.
use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::str::FromStr;

/// Parse `YYYY-MM-DD` into a date.  The year must have four digits and the month and day must have
/// two, so that the value can be spliced verbatim into a timestamp string later.

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let parts = s.split('-').collect::<Vec<&str>>();
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        bail!("Invalid date syntax, expected YYYY-MM-DD");
    }
    let mut vals = [0u32; 3];
    for (i, p) in parts.iter().enumerate() {
        if !p.bytes().all(|c| c.is_ascii_digit()) {
            bail!("Invalid date syntax, expected YYYY-MM-DD");
        }
        vals[i] = u32::from_str(p)?;
    }
    match NaiveDate::from_ymd_opt(vals[0] as i32, vals[1], vals[2]) {
        Some(d) => Ok(d),
        None => bail!("Invalid date"),
    }
}

/// Format a date the way `parse_date` accepts it.

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[test]
fn test_parse_date() {
    let d = parse_date("2023-05-01").unwrap();
    assert!(d == NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
    assert!(format_date(d) == "2023-05-01");

    assert!(parse_date("2023-5-01").is_err());
    assert!(parse_date("2023-05-1").is_err());
    assert!(parse_date("23-05-01").is_err());
    assert!(parse_date("2023-02-30").is_err());
    assert!(parse_date("2023-13-01").is_err());
    assert!(parse_date("2023-05-01T00").is_err());
    assert!(parse_date("+023-05-01").is_err());
    assert!(parse_date("").is_err());
}
