//! Date resolution for `pubDate` values.
//!
//! Feeds in the wild use a handful of date shapes. Each shape is a
//! [`DateFormat`]; [`resolve`] tries them in [`DATE_FORMATS`] order and keeps
//! the first that parses. Month and weekday names are always English
//! (chrono's parser is locale-invariant), whatever the host locale is.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// RFC 822 body once the optional `Dow,` prefix and the zone are removed
const RFC822_BODY: &str = "%d %b %Y %H:%M:%S";

/// Universal zone names (RFC 822 `UT` / `GMT`, plus `UTC` and military `Z`)
const NAMED_ZONES: &[(&str, i32)] = &[("GMT", 0), ("UT", 0), ("UTC", 0), ("Z", 0)];

/// Regional abbreviations, offsets in minutes east of UTC
const ZONE_ABBREVIATIONS: &[(&str, i32)] = &[
    ("EST", -5 * 60),
    ("EDT", -4 * 60),
    ("CST", -6 * 60),
    ("CDT", -5 * 60),
    ("MST", -7 * 60),
    ("MDT", -6 * 60),
    ("PST", -8 * 60),
    ("PDT", -7 * 60),
    ("WET", 0),
    ("BST", 60),
    ("CET", 60),
    ("CEST", 2 * 60),
    ("EET", 2 * 60),
    ("EEST", 3 * 60),
    ("MSK", 3 * 60),
    ("JST", 9 * 60),
    ("AEST", 10 * 60),
    ("AEDT", 11 * 60),
];

/// A single accepted date shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `Mon, 02 Jan 2006 15:04:05 GMT`
    Rfc822NamedZone,
    /// `Mon, 02 Jan 2006 15:04:05 +0000`
    Rfc822NumericOffset,
    /// `Mon, 02 Jan 2006 15:04:05 EST`
    Rfc822ZoneAbbrev,
    /// `Mon, 02 Jan 2006 15:04:05`, read as UTC
    Rfc822NoZone,
    /// `2006-01-02T15:04:05+00:00`
    Iso8601Offset,
    /// `2006-01-02 15:04:05`, read as UTC
    Plain,
}

/// Resolution order, most specific first.
///
/// The order is load-bearing: a less specific shape tried early could accept a
/// value by ignoring part of it that a more specific shape would honor.
pub const DATE_FORMATS: [DateFormat; 6] = [
    DateFormat::Rfc822NamedZone,
    DateFormat::Rfc822NumericOffset,
    DateFormat::Rfc822ZoneAbbrev,
    DateFormat::Rfc822NoZone,
    DateFormat::Iso8601Offset,
    DateFormat::Plain,
];

impl DateFormat {
    /// Parse `text` (already trimmed) with this shape only.
    pub fn parse(self, text: &str) -> Option<DateTime<Utc>> {
        match self {
            DateFormat::Rfc822NamedZone => parse_rfc822_with_zone(text, NAMED_ZONES),
            DateFormat::Rfc822NumericOffset => {
                let body = strip_weekday(text);
                DateTime::parse_from_str(body, "%d %b %Y %H:%M:%S %z")
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            DateFormat::Rfc822ZoneAbbrev => parse_rfc822_with_zone(text, ZONE_ABBREVIATIONS),
            DateFormat::Rfc822NoZone => {
                let body = strip_weekday(text);
                NaiveDateTime::parse_from_str(body, RFC822_BODY)
                    .ok()
                    .map(|naive| naive.and_utc())
            }
            DateFormat::Iso8601Offset => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DateFormat::Plain => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc()),
        }
    }
}

/// Resolve a feed date to a UTC instant, or `None` if no format matches.
pub fn resolve(text: &str) -> Option<DateTime<Utc>> {
    resolve_with_format(text).map(|(dt, _)| dt)
}

/// Like [`resolve`], also reporting which format matched.
pub fn resolve_with_format(text: &str) -> Option<(DateTime<Utc>, DateFormat)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| format.parse(text).map(|dt| (dt, *format)))
}

/// Drop an RFC 822 `Dow,` prefix. The weekday is optional in RFC 822 and is
/// frequently wrong in real feeds, so it is never validated.
fn strip_weekday(text: &str) -> &str {
    match text.split_once(',') {
        Some((day, rest)) if day.trim().chars().all(|c| c.is_ascii_alphabetic()) => rest.trim(),
        _ => text,
    }
}

fn parse_rfc822_with_zone(text: &str, zones: &[(&str, i32)]) -> Option<DateTime<Utc>> {
    let (body, zone) = strip_weekday(text).rsplit_once(char::is_whitespace)?;

    let minutes = zones
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(zone))
        .map(|(_, minutes)| *minutes)?;

    let naive = NaiveDateTime::parse_from_str(body.trim_end(), RFC822_BODY).ok()?;
    let offset = FixedOffset::east_opt(minutes * 60)?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_numeric_offset() {
        let (dt, format) = resolve_with_format("Mon, 02 Jan 2006 15:04:05 +0000").unwrap();
        assert_eq!(format, DateFormat::Rfc822NumericOffset);
        assert_eq!(dt, utc(2006, 1, 2, 15, 4, 5));
    }

    #[test]
    fn test_numeric_offset_converted_to_utc() {
        let dt = resolve("Mon, 02 Jan 2006 15:04:05 -0700").unwrap();
        assert_eq!(dt, utc(2006, 1, 2, 22, 4, 5));
    }

    #[test]
    fn test_named_zone() {
        let (dt, format) = resolve_with_format("Mon, 02 Jan 2006 15:04:05 GMT").unwrap();
        assert_eq!(format, DateFormat::Rfc822NamedZone);
        assert_eq!(dt, utc(2006, 1, 2, 15, 4, 5));

        let (_, format) = resolve_with_format("Mon, 02 Jan 2006 15:04:05 UT").unwrap();
        assert_eq!(format, DateFormat::Rfc822NamedZone);
    }

    #[test]
    fn test_zone_abbreviation() {
        let (dt, format) = resolve_with_format("Mon, 02 Jan 2006 15:04:05 EST").unwrap();
        assert_eq!(format, DateFormat::Rfc822ZoneAbbrev);
        assert_eq!(dt, utc(2006, 1, 2, 20, 4, 5));
    }

    #[test]
    fn test_unknown_zone_is_unresolved() {
        assert!(resolve("Mon, 02 Jan 2006 15:04:05 XYZ").is_none());
    }

    #[test]
    fn test_no_zone_is_utc() {
        let (dt, format) = resolve_with_format("Mon, 02 Jan 2006 15:04:05").unwrap();
        assert_eq!(format, DateFormat::Rfc822NoZone);
        assert_eq!(dt, utc(2006, 1, 2, 15, 4, 5));
    }

    #[test]
    fn test_weekday_optional_and_unchecked() {
        assert_eq!(
            resolve("02 Jan 2006 15:04:05 GMT"),
            Some(utc(2006, 1, 2, 15, 4, 5))
        );
        // 2 Jan 2006 was a Monday; a wrong weekday still resolves
        assert_eq!(
            resolve("Fri, 2 Jan 2006 15:04:05 +0000"),
            Some(utc(2006, 1, 2, 15, 4, 5))
        );
    }

    #[test]
    fn test_iso8601() {
        let (dt, format) = resolve_with_format("2006-01-02T15:04:05+03:00").unwrap();
        assert_eq!(format, DateFormat::Iso8601Offset);
        assert_eq!(dt, utc(2006, 1, 2, 12, 4, 5));

        assert_eq!(
            resolve("2006-01-02T15:04:05Z"),
            Some(utc(2006, 1, 2, 15, 4, 5))
        );
    }

    #[test]
    fn test_plain() {
        let (dt, format) = resolve_with_format("2006-01-02 15:04:05").unwrap();
        assert_eq!(format, DateFormat::Plain);
        assert_eq!(dt, utc(2006, 1, 2, 15, 4, 5));
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert_eq!(
            resolve("\n   Mon, 02 Jan 2006 15:04:05 GMT  \n"),
            Some(utc(2006, 1, 2, 15, 4, 5))
        );
    }

    #[test]
    fn test_garbage_resolves_to_none() {
        assert!(resolve("not a date").is_none());
        assert!(resolve("").is_none());
        assert!(resolve("   ").is_none());
        assert!(resolve("Mon, 32 Jan 2006 15:04:05 GMT").is_none());
        assert!(resolve("2006-13-02 15:04:05").is_none());
    }

    #[test]
    fn test_each_format_rejects_other_shapes() {
        let plain = "2006-01-02 15:04:05";
        for format in &DATE_FORMATS[..5] {
            assert!(format.parse(plain).is_none(), "{:?} accepted {}", format, plain);
        }
    }
}
