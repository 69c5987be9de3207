/// Per-line parse errors.
///
/// These are recoverable: the driver reports the line and moves on, unless it runs in strict mode.
/// Everything else (I/O, transport) goes through `anyhow`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("expected at least {needed} fields, found {found}")]
    TooFewFields { found: usize, needed: usize },

    #[error("field `{field}` is not a number: {token:?}")]
    BadNumber { field: &'static str, token: String },

    #[error("field `{field}` is negative: {value}")]
    NegativeNumber { field: &'static str, value: f64 },

    #[error("line does not start with a HH:MM:SS time of day")]
    BadTimeOfDay,

    #[error("timestamp out of range")]
    TimestampOutOfRange,
}

/// A parse error names the offending line and the reason.

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} in line {line:?}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, line: &str) -> ParseError {
        ParseError {
            kind,
            line: line.to_string(),
        }
    }
}

#[test]
fn test_parse_error_display() {
    let e = ParseError::new(ParseErrorKind::TooFewFields { found: 3, needed: 13 }, "a b c");
    assert!(e.to_string() == "expected at least 13 fields, found 3 in line \"a b c\"");
    let e = ParseError::new(
        ParseErrorKind::BadNumber {
            field: "io",
            token: "x".to_string(),
        },
        "l",
    );
    assert!(e.to_string() == "field `io` is not a number: \"x\" in line \"l\"");
}
