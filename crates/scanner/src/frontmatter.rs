//! Leading `---` key/value block of a note.
//!
//! ```text
//! ---
//! remind at: 2024-05-01 09:00
//! repeats: every 1 week
//! stop on: 2024-12-31
//! ---
//! Water the plants
//! ```
//!
//! Nothing in here ever fails: malformed blocks, unknown keys and unparseable
//! dates simply leave the corresponding field absent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};

use crate::recurrence::localize;
use crate::schema::truncate_chars;

pub const DELIMITER: &str = "---";

pub const REMIND_AT_KEY: &str = "remind at";
pub const REPEATS_KEY: &str = "repeats";
pub const STOP_ON_KEY: &str = "stop on";

/// Preview used when a note has no body text.
pub const EMPTY_PREVIEW: &str = "[no content]";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Frontmatter<Tz: TimeZone> {
    pub remind_at: Option<DateTime<Tz>>,
    /// Lower-cased rule text.
    pub repeats: Option<String>,
    pub stop_on: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> Default for Frontmatter<Tz> {
    fn default() -> Self {
        Self {
            remind_at: None,
            repeats: None,
            stop_on: None,
        }
    }
}

/// Split `text` into the raw frontmatter block and the body after it.
///
/// Returns `None` unless the text starts with the delimiter and a second
/// delimiter follows somewhere after it.
pub fn split_block(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix(DELIMITER)?;
    let end = rest.find(DELIMITER)?;
    let block = &rest[..end];
    let body = &rest[end + DELIMITER.len()..];
    Some((block, body))
}

/// Parse reminder fields from the frontmatter of `text`, interpreting dates
/// without an explicit offset in `tz`.
pub fn parse_frontmatter<Tz: TimeZone>(text: &str, tz: &Tz) -> Option<Frontmatter<Tz>> {
    let (block, _) = split_block(text)?;
    let mut fields = Frontmatter::default();

    for line in block.lines().filter(|line| !line.trim().is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            REMIND_AT_KEY if fields.remind_at.is_none() => {
                fields.remind_at = parse_date(value, tz);
            }
            REPEATS_KEY if fields.repeats.is_none() && !value.is_empty() => {
                fields.repeats = Some(unquote(value).to_lowercase());
            }
            STOP_ON_KEY if fields.stop_on.is_none() => {
                fields.stop_on = parse_date(value, tz);
            }
            _ => {}
        }
    }

    Some(fields)
}

/// Parse a frontmatter date.
///
/// RFC 3339 values keep their offset; `YYYY-MM-DD[ HH:MM[:SS]]` values are
/// local wall-clock times in `tz`, a bare date meaning local midnight.
pub fn parse_date<Tz: TimeZone>(value: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    let value = unquote(value);
    if value.is_empty() {
        return None;
    }

    if let Ok(fixed) = DateTime::parse_from_rfc3339(value) {
        return Some(fixed.with_timezone(tz));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return localize(tz, naive);
        }
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    localize(tz, date.and_hms_opt(0, 0, 0)?)
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    value
}

/// First non-blank body line, cut to `limit` characters.
///
/// The body starts after the frontmatter block when there is one.
pub fn content_preview(text: &str, limit: usize) -> String {
    let body = match split_block(text) {
        Some((_, body)) => body,
        None => text,
    };
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| truncate_chars(line, limit).to_string())
        .unwrap_or_else(|| EMPTY_PREVIEW.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn no_frontmatter_without_leading_delimiter() {
        assert!(parse_frontmatter("remind at: 2024-01-01\n", &Utc).is_none());
        assert!(parse_frontmatter("\n---\nremind at: 2024-01-01\n---\n", &Utc).is_none());
    }

    #[test]
    fn no_frontmatter_without_closing_delimiter() {
        assert!(parse_frontmatter("---\nremind at: 2024-01-01\nbody", &Utc).is_none());
    }

    #[test]
    fn parses_all_reminder_keys() {
        let text = "---\nremind at: 2024-05-01 09:30\nrepeats: Every 2 Days\nstop on: 2024-06-01\n---\nbody\n";
        let fm = parse_frontmatter(text, &Utc).unwrap();
        assert_eq!(fm.remind_at, Some(utc("2024-05-01T09:30:00")));
        assert_eq!(fm.repeats.as_deref(), Some("every 2 days"));
        assert_eq!(fm.stop_on, Some(utc("2024-06-01T00:00:00")));
    }

    #[test]
    fn first_occurrence_wins() {
        let text = "---\nrepeats: every 1 day\nrepeats: every 1 week\nremind at: 2024-05-01\nremind at: 2024-07-01\n---\n";
        let fm = parse_frontmatter(text, &Utc).unwrap();
        assert_eq!(fm.repeats.as_deref(), Some("every 1 day"));
        assert_eq!(fm.remind_at, Some(utc("2024-05-01T00:00:00")));
    }

    #[test]
    fn unparseable_dates_leave_field_absent() {
        let text = "---\nremind at: next tuesday\nstop on: soon\ntitle: x\n---\n";
        let fm = parse_frontmatter(text, &Utc).unwrap();
        assert_eq!(fm, Frontmatter::default());
    }

    #[test]
    fn keys_are_case_sensitive() {
        let text = "---\nRemind At: 2024-05-01\n---\n";
        let fm = parse_frontmatter(text, &Utc).unwrap();
        assert!(fm.remind_at.is_none());
    }

    #[test]
    fn values_keep_colons_after_the_first() {
        let text = "---\nremind at: 2024-05-01T09:30:15\n---\n";
        let fm = parse_frontmatter(text, &Utc).unwrap();
        assert_eq!(fm.remind_at, Some(utc("2024-05-01T09:30:15")));
    }

    #[test]
    fn empty_repeats_is_ignored() {
        let text = "---\nrepeats:\nrepeats: every 3 hours\n---\n";
        let fm = parse_frontmatter(text, &Utc).unwrap();
        assert_eq!(fm.repeats.as_deref(), Some("every 3 hours"));
    }

    #[test]
    fn naive_dates_are_local_and_offsets_are_kept() {
        let tz = FixedOffset::east_opt(-5 * 3600).unwrap();
        let local = parse_date("2024-05-01 09:00", &tz).unwrap();
        assert_eq!(local, tz.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());

        let explicit = parse_date("2024-05-01T09:00:00Z", &tz).unwrap();
        assert_eq!(explicit, utc("2024-05-01T09:00:00"));

        assert_eq!(
            parse_date("\"2024-05-01\"", &Utc),
            Some(utc("2024-05-01T00:00:00"))
        );
    }

    #[test]
    fn preview_uses_first_body_line() {
        let text = "---\nremind at: 2024-05-01\n---\n\n  Call the dentist  \nmore\n";
        assert_eq!(content_preview(text, 100), "Call the dentist");
        assert_eq!(content_preview("plain note\n", 5), "plain");
        assert_eq!(content_preview("---\nk: v\n---\n\n", 100), EMPTY_PREVIEW);
    }

    #[test]
    fn local_times_across_dst_transitions() {
        use chrono_tz::America::New_York;

        // Spring forward: 02:30 does not exist and moves to 03:30 EDT.
        let gap = parse_date("2024-03-10 02:30", &New_York).unwrap();
        assert_eq!(gap, New_York.with_ymd_and_hms(2024, 3, 10, 3, 30, 0).unwrap());
        assert_eq!(gap.with_timezone(&Utc), utc("2024-03-10T07:30:00"));

        // Fall back: 01:30 happens twice and the EDT reading comes first.
        let fold = parse_date("2024-11-03 01:30", &New_York).unwrap();
        assert_eq!(fold.with_timezone(&Utc), utc("2024-11-03T05:30:00"));
    }
}
