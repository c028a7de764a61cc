//! Line-protocol formatting for time-series writes.

use std::fmt::Write;

use crate::bins::Point;

/// Escapes spaces and commas in measurement names, tag names, and tag
/// values with a backslash.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == ' ' || c == ',' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Formats one newline-terminated record:
/// `measurement,tag1=val1,tag2=val2 value=<number> <unixSeconds>`.
pub fn format_line(measurement: &str, point: &Point, timestamp: i64) -> String {
    let mut line = escape(measurement);
    for (name, value) in &point.tags {
        let _ = write!(line, ",{}={}", escape(name), escape(value));
    }
    let _ = write!(line, " value={} {}\n", point.value, timestamp);
    line
}
