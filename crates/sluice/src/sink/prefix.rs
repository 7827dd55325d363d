//! Object key naming.
//!
//! Prefixes may embed placeholders resolved at flush time:
//!
//! - `!{timestamp:<pattern>}` - flush time (UTC) in a Joda-style pattern
//! - `!{firehose:random-string}` - 11 lowercase hex characters, fresh per occurrence
//! - `!{firehose:error-output-type}` - error prefix only, `processing-failed`
//!
//! A prefix without placeholders gets a `YYYY/MM/DD/` suffix appended.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::{Captures, Regex};
use uuid::Uuid;

/// Error output type substituted into error prefixes.
pub const ERROR_OUTPUT_TYPE: &str = "processing-failed";

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\{timestamp:(.+?)\}").expect("timestamp pattern is valid"));

static RANDOM_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\{firehose:random-string\}").expect("random-string pattern is valid")
});

static ERROR_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\{firehose:error-output-type\}").expect("error-output-type pattern is valid")
});

/// Prefix and error-prefix templates of one delivery stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTemplate {
    prefix: String,
    error_prefix: String,
}

impl KeyTemplate {
    pub fn new(prefix: impl Into<String>, error_prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            error_prefix: error_prefix.into(),
        }
    }

    /// Resolve the delivery prefix at `at`.
    pub fn prefix(&self, at: DateTime<Utc>) -> String {
        if self.prefix.is_empty() {
            return date_path(at);
        }
        let (resolved, expanded) = expand(&self.prefix, at);
        if expanded {
            resolved
        } else {
            format!("{resolved}/{}", date_path(at))
        }
    }

    /// Resolve the error prefix at `at`. Empty stays empty.
    pub fn error_prefix(&self, at: DateTime<Utc>) -> String {
        if self.error_prefix.is_empty() {
            return String::new();
        }
        let typed = ERROR_OUTPUT.replace_all(&self.error_prefix, ERROR_OUTPUT_TYPE);
        expand(&typed, at).0
    }

    /// Full object key for a batch of `stream_name` flushed at `at`.
    pub fn object_key(&self, stream_name: &str, at: DateTime<Utc>) -> String {
        let prefix = self.prefix(at);
        let prefix = prefix.strip_suffix('/').unwrap_or(&prefix);
        format!(
            "{prefix}/{stream_name}-1-{}-{}",
            at.format("%Y-%m-%d-%H-%M-%S"),
            Uuid::new_v4()
        )
    }
}

fn date_path(at: DateTime<Utc>) -> String {
    at.format("%Y/%m/%d/").to_string()
}

/// Replace random-string and timestamp placeholders. Reports whether any matched.
fn expand(template: &str, at: DateTime<Utc>) -> (String, bool) {
    let mut expanded = false;

    let text = RANDOM_STRING.replace_all(template, |_: &Captures| {
        expanded = true;
        random_string()
    });
    let text = TIMESTAMP.replace_all(&text, |caps: &Captures| {
        expanded = true;
        format_joda(&caps[1], at)
    });

    (text.into_owned(), expanded)
}

fn random_string() -> String {
    Uuid::new_v4().simple().to_string()[..11].to_string()
}

/// Render `at` with a Joda-Time style pattern.
///
/// Letters repeat to select width or text form (`M`, `MM`, `MMM`, `MMMM`).
/// Text in single quotes is literal, `''` is a quote. Unknown letters pass
/// through unchanged.
pub fn format_joda(pattern: &str, at: DateTime<Utc>) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                out.push(chars[i]);
                i += 1;
            }
            continue;
        }

        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }

        let mut count = 1;
        while chars.get(i + count) == Some(&c) {
            count += 1;
        }
        i += count;
        render_field(&mut out, c, count, at);
    }

    out
}

fn render_field(out: &mut String, field: char, count: usize, at: DateTime<Utc>) {
    use std::fmt::Write;

    let _ = match field {
        'y' | 'Y' | 'x' if count == 2 => write!(out, "{:02}", at.year().rem_euclid(100)),
        'y' | 'Y' | 'x' => write!(out, "{:0count$}", at.year()),
        'M' if count >= 4 => write!(out, "{}", at.format("%B")),
        'M' if count == 3 => write!(out, "{}", at.format("%b")),
        'M' => write!(out, "{:0count$}", at.month()),
        'd' => write!(out, "{:0count$}", at.day()),
        'D' => write!(out, "{:0count$}", at.ordinal()),
        'H' => write!(out, "{:0count$}", at.hour()),
        'k' => write!(out, "{:0count$}", if at.hour() == 0 { 24 } else { at.hour() }),
        'h' => write!(out, "{:0count$}", at.hour12().1),
        'K' => write!(out, "{:0count$}", at.hour() % 12),
        'm' => write!(out, "{:0count$}", at.minute()),
        's' => write!(out, "{:0count$}", at.second()),
        'S' => {
            let nanos = format!("{:09}", at.nanosecond() % 1_000_000_000);
            let digits = count.min(9);
            write!(out, "{}{}", &nanos[..digits], "0".repeat(count - digits))
        }
        'a' => out.write_str(if at.hour12().0 { "PM" } else { "AM" }),
        'E' if count >= 4 => write!(out, "{}", at.format("%A")),
        'E' => write!(out, "{}", at.format("%a")),
        'e' => write!(out, "{:0count$}", at.weekday().number_from_monday()),
        'w' => write!(out, "{:0count$}", at.iso_week().week()),
        'Z' if count == 1 => out.write_str("+0000"),
        'Z' if count == 2 => out.write_str("+00:00"),
        'Z' | 'z' => out.write_str("UTC"),
        'G' => out.write_str(if at.year() > 0 { "AD" } else { "BC" }),
        other => {
            for _ in 0..count {
                out.push(other);
            }
            Ok(())
        }
    };
}
