// Misc utilities for the command line tools: date arguments and file name patterns.

mod dates;
mod fileglob;

// Parse a YYYY-MM-DD date argument, and format it back.

pub use dates::format_date;
pub use dates::parse_date;

// Matcher for file name patterns with `*`, `?` and `[...]` wildcards in the last path component.

pub use fileglob::FileGlobber;

// Test whether a file name pattern has any wildcards.

pub use fileglob::has_wildcards;

// Expand a file name pattern into the list of matching files, in directory enumeration order.

pub use fileglob::expand_file_pattern;
