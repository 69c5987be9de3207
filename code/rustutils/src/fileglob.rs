/// Matcher and expander for file name patterns, as given to `--filename`.
///
/// The pattern is an ordinary path whose components may contain wildcards:
///
///   `*`       matches any run of characters, including none
///   `?`       matches exactly one character
///   `[...]`   matches one character from the set; `[!...]` matches one not in the set; ranges
///             `a-z` are allowed inside the brackets
///
/// A wildcard never matches `/`, so `logs/*/iotop.log` matches one level of directories.  A
/// leading `.` in a file name is not special.
///
/// Expansion returns the matching files in the order the directory enumeration yields them, which
/// is whatever order the file system uses.  Callers must not assume the names are sorted.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// A `FileGlobber` matches file names (not paths) against one compiled pattern.

pub struct FileGlobber {
    // Matcher + source pattern, for posterity.
    matcher: (Regex, String),
}

impl FileGlobber {
    pub fn new(pattern: &str) -> Result<FileGlobber> {
        Ok(FileGlobber {
            matcher: compile_globber(pattern)?,
        })
    }

    /// Match the file name against the pattern.

    pub fn match_filename(&self, s: &str) -> bool {
        self.matcher.0.is_match(s)
    }

    /// The regular expression the pattern compiled to.

    pub fn source(&self) -> &str {
        &self.matcher.1
    }
}

/// True if `s` contains any of the wildcard characters.

pub fn has_wildcards(s: &str) -> bool {
    s.contains(|c: char| c == '*' || c == '?' || c == '[')
}

/// Expand `pattern` into a list of existing file names.
///
/// If the pattern has no wildcards it is returned as the only element without checking that the
/// file exists; opening it will report the problem.  Otherwise the path is expanded one component
/// at a time: directories are read where a component has wildcards, and only regular files are
/// returned.  It is an error for a wildcard pattern to match nothing, and for the literal directory
/// in front of the first wildcard to be unreadable.

pub fn expand_file_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let p = Path::new(pattern);
    if p.file_name().is_none() {
        bail!("Not a file pattern: {pattern}");
    }
    if !has_wildcards(pattern) {
        return Ok(vec![p.to_path_buf()]);
    }

    let components = p.components().collect::<Vec<Component>>();
    let mut candidates = vec![PathBuf::new()];
    let mut expanded = false;
    for (i, c) in components.iter().enumerate() {
        let name = match c {
            Component::Normal(n) => match n.to_str() {
                Some(n) => n,
                None => bail!("File pattern is not valid UTF-8"),
            },
            _ => {
                for cand in &mut candidates {
                    cand.push(c.as_os_str());
                }
                continue;
            }
        };
        if !has_wildcards(name) {
            for cand in &mut candidates {
                cand.push(name);
            }
            continue;
        }

        let want_dir = i + 1 < components.len();
        let globber = FileGlobber::new(name)?;
        let mut next = vec![];
        for cand in &candidates {
            let read_from = if cand.as_os_str().is_empty() {
                Path::new(".")
            } else {
                cand.as_path()
            };
            let entries = match read_from.read_dir() {
                Ok(entries) => entries,
                // Below an expanded directory a missing subdirectory just means no match there.
                Err(_) if expanded => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Could not read directory {}", read_from.display()))
                }
            };
            for entry in entries {
                let entry = match entry {
                    Ok(e) => e,
                    // Bad directory entries are ignored, as for the log tree walker.
                    Err(_) => continue,
                };
                let fname = entry.file_name();
                let fname = match fname.to_str() {
                    Some(f) => f,
                    // Non-UTF8 names can't match a UTF8 pattern.
                    None => continue,
                };
                if !globber.match_filename(fname) {
                    continue;
                }
                let path = cand.join(fname);
                // These follow symlinks.
                if (want_dir && path.is_dir()) || (!want_dir && path.is_file()) {
                    next.push(path);
                }
            }
        }
        candidates = next;
        expanded = true;
    }

    // A literal file name after a wildcard directory need not exist in every directory.
    candidates.retain(|c| c.is_file());
    if candidates.is_empty() {
        bail!("No files match {pattern}");
    }
    Ok(candidates)
}

fn compile_globber(p: &str) -> Result<(Regex, String)> {
    let cs = p.chars().collect::<Vec<char>>();
    let mut i = 0usize;
    let mut r = "^".to_string();
    while i < cs.len() {
        match cs[i] {
            '*' => {
                i += 1;
                r += "[^/]*";
            }
            '?' => {
                i += 1;
                r += "[^/]";
            }
            '[' => {
                i += 1;
                r.push('[');
                if i < cs.len() && (cs[i] == '!' || cs[i] == '^') {
                    r.push('^');
                    i += 1;
                }
                let first = i;
                loop {
                    if i >= cs.len() {
                        bail!("Unterminated '[' in file pattern");
                    }
                    // A ']' first in the set is a literal.
                    if cs[i] == ']' && i > first {
                        i += 1;
                        break;
                    }
                    match cs[i] {
                        '\\' | '[' | ']' | '&' | '~' | '^' => {
                            r.push('\\');
                            r.push(cs[i]);
                        }
                        c => r.push(c),
                    }
                    i += 1;
                }
                r.push(']');
            }
            c => {
                r += &regex::escape(&c.to_string());
                i += 1;
            }
        }
    }
    r += "$";
    Ok((Regex::new(&r)?, r))
}

#[test]
fn test_fileglob_match() {
    let g = FileGlobber::new("iotop-*.log").unwrap();
    assert!(g.match_filename("iotop-1.log"));
    assert!(g.match_filename("iotop-.log"));
    assert!(!g.match_filename("iotop-1.logx"));
    assert!(!g.match_filename("xiotop-1.log"));

    let g = FileGlobber::new("day?.txt").unwrap();
    assert!(g.match_filename("day1.txt"));
    assert!(!g.match_filename("day12.txt"));
    assert!(!g.match_filename("dayXtxt"));

    let g = FileGlobber::new("f[0-2].log").unwrap();
    assert!(g.match_filename("f0.log"));
    assert!(g.match_filename("f2.log"));
    assert!(!g.match_filename("f3.log"));

    let g = FileGlobber::new("f[!0-2].log").unwrap();
    assert!(!g.match_filename("f1.log"));
    assert!(g.match_filename("f7.log"));

    // Regex metacharacters are literals.
    let g = FileGlobber::new("a+b(1).log").unwrap();
    assert!(g.match_filename("a+b(1).log"));
    assert!(!g.match_filename("aab1.log"));

    assert!(FileGlobber::new("f[0-2.log").is_err());
}

#[test]
fn test_expand_file_pattern() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.log", "b.log", "c.txt"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }
    std::fs::create_dir(dir.path().join("d.log")).unwrap();

    let pattern = format!("{}/*.log", dir.path().to_str().unwrap());
    let mut found = expand_file_pattern(&pattern).unwrap();
    found.sort();
    assert!(found == vec![dir.path().join("a.log"), dir.path().join("b.log")]);

    let pattern = format!("{}/*.csv", dir.path().to_str().unwrap());
    assert!(expand_file_pattern(&pattern).is_err());

    // Literal names pass through unchecked.
    let pattern = format!("{}/nonesuch.log", dir.path().to_str().unwrap());
    assert!(expand_file_pattern(&pattern).unwrap() == vec![dir.path().join("nonesuch.log")]);

    // The directory in front of the wildcard is named in the error.
    let e = expand_file_pattern("nodir/*.log").unwrap_err();
    assert!(format!("{e:#}").contains("Could not read directory nodir"));
}

#[test]
fn test_expand_directory_wildcards() {
    let dir = tempfile::tempdir().unwrap();
    for host in ["host1", "host2", "other"] {
        std::fs::create_dir(dir.path().join(host)).unwrap();
    }
    std::fs::write(dir.path().join("host1/iotop.log"), "").unwrap();
    std::fs::write(dir.path().join("host2/iotop.log"), "").unwrap();
    std::fs::write(dir.path().join("host2/iotop.txt"), "").unwrap();
    std::fs::write(dir.path().join("other/iotop.log"), "").unwrap();
    // A file whose name matches the directory pattern is not descended into.
    std::fs::write(dir.path().join("host3"), "").unwrap();

    let root = dir.path().to_str().unwrap();
    let mut found = expand_file_pattern(&format!("{root}/host*/iotop.log")).unwrap();
    found.sort();
    assert!(
        found
            == vec![
                dir.path().join("host1/iotop.log"),
                dir.path().join("host2/iotop.log")
            ]
    );

    let mut found = expand_file_pattern(&format!("{root}/host?/*")).unwrap();
    found.sort();
    assert!(
        found
            == vec![
                dir.path().join("host1/iotop.log"),
                dir.path().join("host2/iotop.log"),
                dir.path().join("host2/iotop.txt")
            ]
    );

    // Literal names below a wildcard directory must exist somewhere.
    assert!(expand_file_pattern(&format!("{root}/*/nonesuch.log")).is_err());
    assert!(expand_file_pattern(&format!("{root}/*/sub/*.log")).is_err());
}
