//! Hand-rolled 5/6/7-field cron expression parser and timezone-aware
//! next-occurrence computation (spec §4.1).
//!
//! Extends the always-AND, 5-field, always-UTC matcher/next-occurrence walk
//! this is grounded on with: named month/day-of-week literals, the
//! traditional Unix day-of-month/day-of-week OR/AND combination rule,
//! optional seconds/year fields, and a hierarchical carry-based
//! next-occurrence search bounded to a 5-year window instead of a flat
//! per-minute scan.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;

const MAX_YEARS_AHEAD: i32 = 5;
const MAX_ITERATIONS: u32 = 200_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum CronError {
    #[error("cron expression must have 5, 6, or 7 whitespace-separated fields, got {0}")]
    WrongFieldCount(usize),

    #[error("invalid {field} field: {token}")]
    InvalidField { field: &'static str, token: String },

    #[error("no occurrence found within {0} years")]
    NoOccurrenceFoundInWindow(i32),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Parse an IANA timezone name, defaulting to UTC for an empty string but
/// rejecting anything unrecognized (stricter than the always-fall-back
/// grounding behavior, since a silently-wrong timezone in a schedule is a
/// config bug worth surfacing at register time).
pub fn parse_timezone(tz: Option<&str>) -> Result<Tz, CronError> {
    match tz {
        None => Ok(chrono_tz::UTC),
        Some(name) if name.is_empty() => Ok(chrono_tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| CronError::InvalidTimezone(name.to_string())),
    }
}

fn month_name_to_num(name: &str) -> Option<u32> {
    const NAMES: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    NAMES
        .iter()
        .position(|n| n.eq_ignore_ascii_case(name))
        .map(|i| i as u32 + 1)
}

fn dow_name_to_num(name: &str) -> Option<u32> {
    const NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
    NAMES
        .iter()
        .position(|n| n.eq_ignore_ascii_case(name))
        .map(|i| i as u32)
}

/// Replace alphabetic tokens in `field` using `lookup`, leaving numeric
/// tokens and separators untouched.
fn expand_named_literals(field: &str, lookup: impl Fn(&str) -> Option<u32>) -> String {
    let mut out = String::with_capacity(field.len());
    let bytes = field.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = field[i..].chars().next().unwrap();
        if c.is_ascii_alphabetic() {
            let start = i;
            let mut end = i;
            while end < bytes.len() && field[end..].chars().next().unwrap().is_ascii_alphabetic() {
                end += field[end..].chars().next().unwrap().len_utf8();
            }
            let token = &field[start..end];
            match lookup(token) {
                Some(n) => out.push_str(&n.to_string()),
                None => out.push_str(token),
            }
            i = end;
        } else {
            out.push(c);
            i += c.len_utf8();
        }
    }
    out
}

/// Canonicalize bare `7` tokens in a day-of-week field to `0` (Sunday may be
/// expressed as either).
fn normalize_dow_sunday(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for (idx, part) in field.split(',').enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if part == "7" {
            out.push('0');
        } else if let Some((start, rest)) = part.split_once('-') {
            // Ranges like "6-7" canonicalize the endpoint only; full
            // wraparound ranges are not modeled, matching common cron
            // dialect behavior for this edge case.
            let end = rest.split('/').next().unwrap_or(rest);
            let suffix = &rest[end.len()..];
            let end_norm = if end == "7" { "0" } else { end };
            out.push_str(start);
            out.push('-');
            out.push_str(end_norm);
            out.push_str(suffix);
        } else {
            out.push_str(part);
        }
    }
    out
}

fn part_matches(part: &str, value: u32) -> bool {
    if let Some((range_or_star, step_str)) = part.split_once('/') {
        let Ok(step) = step_str.parse::<u32>() else {
            return false;
        };
        if step == 0 {
            return false;
        }
        let (start, end) = if range_or_star == "*" {
            (0u32, u32::MAX)
        } else if let Some((s, e)) = range_or_star.split_once('-') {
            match (s.parse::<u32>(), e.parse::<u32>()) {
                (Ok(s), Ok(e)) => (s, e),
                _ => return false,
            }
        } else if let Ok(n) = range_or_star.parse::<u32>() {
            (n, u32::MAX)
        } else {
            return false;
        };
        if value < start || (end != u32::MAX && value > end) {
            return false;
        }
        (value - start) % step == 0
    } else if let Some((s, e)) = part.split_once('-') {
        match (s.parse::<u32>(), e.parse::<u32>()) {
            (Ok(s), Ok(e)) => value >= s && value <= e,
            _ => false,
        }
    } else if let Ok(n) = part.parse::<u32>() {
        value == n
    } else {
        false
    }
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    field.split(',').any(|part| part_matches(part, value))
}

fn validate_field(field: &str, name: &'static str, min: u32, max: u32) -> Result<(), CronError> {
    let invalid = || CronError::InvalidField {
        field: name,
        token: field.to_string(),
    };
    if field == "*" {
        return Ok(());
    }
    for part in field.split(',') {
        let bare = part.split('/').next().unwrap_or(part);
        if bare == "*" {
            continue;
        }
        let tokens: Vec<&str> = bare.split('-').collect();
        for tok in &tokens {
            let n: u32 = tok.parse().map_err(|_| invalid())?;
            if n < min || n > max {
                return Err(invalid());
            }
        }
        if let Some((_, step)) = part.split_once('/') {
            let n: u32 = step.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(invalid());
            }
        }
    }
    Ok(())
}

/// A parsed cron expression, fields normalized (named literals expanded,
/// Sunday canonicalized to `0`) and validated.
#[derive(Debug, Clone)]
pub struct ParsedCron {
    second: String,
    minute: String,
    hour: String,
    day_of_month: String,
    month: String,
    day_of_week: String,
    year: Option<String>,
    has_explicit_seconds: bool,
}

impl ParsedCron {
    /// Parse and validate a 5, 6, or 7 field cron expression. Six fields
    /// prepend `second`; seven fields additionally append `year`.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (second, minute, hour, dom, month, dow, year, has_explicit_seconds) = match fields.len() {
            5 => (
                "0".to_string(),
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
                fields[3].to_string(),
                fields[4].to_string(),
                None,
                false,
            ),
            6 => (
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
                fields[3].to_string(),
                fields[4].to_string(),
                fields[5].to_string(),
                None,
                true,
            ),
            7 => (
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
                fields[3].to_string(),
                fields[4].to_string(),
                fields[5].to_string(),
                Some(fields[6].to_string()),
                true,
            ),
            n => return Err(CronError::WrongFieldCount(n)),
        };

        let month = expand_named_literals(&month, month_name_to_num);
        let dow = normalize_dow_sunday(&expand_named_literals(&dow, dow_name_to_num));

        validate_field(&second, "second", 0, 59)?;
        validate_field(&minute, "minute", 0, 59)?;
        validate_field(&hour, "hour", 0, 23)?;
        validate_field(&dom, "day_of_month", 1, 31)?;
        validate_field(&month, "month", 1, 12)?;
        validate_field(&dow, "day_of_week", 0, 7)?;
        if let Some(y) = &year {
            validate_field(y, "year", 1970, 9999)?;
        }

        Ok(Self {
            second,
            minute,
            hour,
            day_of_month: dom,
            month,
            day_of_week: dow,
            year,
            has_explicit_seconds,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_restricted = self.day_of_month != "*";
        let dow_restricted = self.day_of_week != "*";
        let dom_match = field_matches(&self.day_of_month, date.day());
        let dow_match = field_matches(&self.day_of_week, date.weekday().num_days_from_sunday());

        if dom_restricted && dow_restricted {
            dom_match || dow_match
        } else {
            dom_match && dow_match
        }
    }

    fn month_matches(&self, month: u32) -> bool {
        field_matches(&self.month, month)
    }

    fn year_matches(&self, year: i32) -> bool {
        match &self.year {
            None => true,
            Some(y) => field_matches(y, year as u32),
        }
    }

    fn hour_matches(&self, hour: u32) -> bool {
        field_matches(&self.hour, hour)
    }

    fn minute_matches(&self, minute: u32) -> bool {
        field_matches(&self.minute, minute)
    }

    fn second_matches(&self, second: u32) -> bool {
        field_matches(&self.second, second)
    }

    /// Whether this expression constrains seconds (6- or 7-field), which per
    /// spec §4.4 requires ≤1s polling resolution instead of ≤60s.
    pub fn requires_sub_minute_resolution(&self) -> bool {
        self.has_explicit_seconds && self.second != "*"
    }

    /// Does the given UTC instant match this expression, evaluated in civil
    /// time of `tz`?
    pub fn matches(&self, instant: chrono::DateTime<chrono::Utc>, tz: Tz) -> bool {
        let local = instant.with_timezone(&tz).naive_local();
        self.year_matches(local.year())
            && self.month_matches(local.month())
            && self.day_matches(local.date())
            && self.hour_matches(local.hour())
            && self.minute_matches(local.minute())
            && (!self.has_explicit_seconds || self.second_matches(local.second()))
    }

    /// Compute the next occurrence strictly after `after`, evaluated in civil
    /// time of `tz`. DST spring-forward gaps are skipped; DST fall-back picks
    /// the first (pre-repeat) instant (spec §4.1/§8).
    pub fn next_occurrence(
        &self,
        after: chrono::DateTime<chrono::Utc>,
        tz: Tz,
    ) -> Result<chrono::DateTime<chrono::Utc>, CronError> {
        let local_after = after.with_timezone(&tz).naive_local();
        let mut candidate = if self.has_explicit_seconds {
            local_after + chrono::Duration::seconds(1)
        } else {
            let next_minute = local_after
                .date()
                .and_time(NaiveTime::from_hms_opt(local_after.hour(), local_after.minute(), 0).unwrap())
                + chrono::Duration::minutes(1);
            next_minute
        };

        let limit = NaiveDate::from_ymd_opt(local_after.year() + MAX_YEARS_AHEAD, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS || candidate > limit {
                return Err(CronError::NoOccurrenceFoundInWindow(MAX_YEARS_AHEAD));
            }

            if !self.year_matches(candidate.year()) {
                candidate = NaiveDate::from_ymd_opt(candidate.year() + 1, 1, 1)
                    .ok_or(CronError::NoOccurrenceFoundInWindow(MAX_YEARS_AHEAD))?
                    .and_hms_opt(0, 0, 0)
                    .unwrap();
                continue;
            }

            if !self.month_matches(candidate.month()) {
                candidate = advance_month(candidate);
                continue;
            }

            if !self.day_matches(candidate.date()) {
                candidate = advance_day(candidate);
                continue;
            }

            if !self.hour_matches(candidate.hour()) {
                candidate = advance_hour(candidate);
                continue;
            }

            if !self.minute_matches(candidate.minute()) {
                candidate = advance_minute(candidate);
                continue;
            }

            if self.has_explicit_seconds && !self.second_matches(candidate.second()) {
                candidate += chrono::Duration::seconds(1);
                continue;
            }

            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Ok(dt.with_timezone(&chrono::Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Ok(earliest.with_timezone(&chrono::Utc));
                }
                chrono::LocalResult::None => {
                    // Spring-forward gap: this local time doesn't exist, skip it.
                    candidate = if self.has_explicit_seconds {
                        candidate + chrono::Duration::seconds(1)
                    } else {
                        advance_minute(candidate)
                    };
                }
            }
        }
    }
}

fn advance_month(dt: NaiveDateTime) -> NaiveDateTime {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn advance_day(dt: NaiveDateTime) -> NaiveDateTime {
    (dt.date() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn advance_hour(dt: NaiveDateTime) -> NaiveDateTime {
    let base = dt
        .date()
        .and_hms_opt(dt.hour(), 0, 0)
        .unwrap();
    base + chrono::Duration::hours(1)
}

fn advance_minute(dt: NaiveDateTime) -> NaiveDateTime {
    let base = dt
        .date()
        .and_hms_opt(dt.hour(), dt.minute(), 0)
        .unwrap();
    base + chrono::Duration::minutes(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert_eq!(
            ParsedCron::parse("* * *").unwrap_err(),
            CronError::WrongFieldCount(3)
        );
    }

    #[test]
    fn test_parse_accepts_5_6_7_fields() {
        assert!(ParsedCron::parse("*/5 * * * *").is_ok());
        assert!(ParsedCron::parse("0 */5 * * * *").is_ok());
        assert!(ParsedCron::parse("0 0 0 1 1 * 2030").is_ok());
    }

    #[test]
    fn test_parse_rejects_out_of_range_field() {
        assert!(ParsedCron::parse("60 * * * *").is_err());
        assert!(ParsedCron::parse("* * * 13 *").is_err());
    }

    #[test]
    fn test_named_month_literal() {
        let cron = ParsedCron::parse("0 0 1 jan *").unwrap();
        let dt = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(cron.matches(dt, chrono_tz::UTC));
    }

    #[test]
    fn test_named_dow_literal() {
        let cron = ParsedCron::parse("0 0 * * mon").unwrap();
        // 2024-06-17 is a Monday.
        let dt = Utc.with_ymd_and_hms(2024, 6, 17, 0, 0, 0).unwrap();
        assert!(cron.matches(dt, chrono_tz::UTC));
        let dt_tue = Utc.with_ymd_and_hms(2024, 6, 18, 0, 0, 0).unwrap();
        assert!(!cron.matches(dt_tue, chrono_tz::UTC));
    }

    #[test]
    fn test_sunday_0_and_7_equivalent() {
        let cron_0 = ParsedCron::parse("0 0 * * 0").unwrap();
        let cron_7 = ParsedCron::parse("0 0 * * 7").unwrap();
        // 2024-06-16 is a Sunday.
        let dt = Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).unwrap();
        assert!(cron_0.matches(dt, chrono_tz::UTC));
        assert!(cron_7.matches(dt, chrono_tz::UTC));
    }

    #[test]
    fn test_dom_dow_or_combination_when_both_restricted() {
        // 15th of the month OR Friday.
        let cron = ParsedCron::parse("0 0 15 * fri").unwrap();
        let fri_not_15th = Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap(); // a Friday
        assert!(cron.matches(fri_not_15th, chrono_tz::UTC));
        let the_15th_not_fri = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap(); // a Saturday
        assert!(cron.matches(the_15th_not_fri, chrono_tz::UTC));
        let neither = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        assert!(!cron.matches(neither, chrono_tz::UTC));
    }

    #[test]
    fn test_dom_dow_and_combination_when_one_unrestricted() {
        let cron = ParsedCron::parse("0 0 15 * *").unwrap();
        let the_15th = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        assert!(cron.matches(the_15th, chrono_tz::UTC));
        let not_15th = Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).unwrap();
        assert!(!cron.matches(not_15th, chrono_tz::UTC));
    }

    #[test]
    fn test_cron_monotonic_next_occurrence() {
        let cron = ParsedCron::parse("*/7 * * * *").unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let n1 = cron.next_occurrence(t0, chrono_tz::UTC).unwrap();
        let n2 = cron.next_occurrence(n1, chrono_tz::UTC).unwrap();
        assert!(n1 > t0);
        assert!(n2 > n1);
    }

    #[test]
    fn test_every_minute_utc_scenario() {
        // spec §8 scenario 1
        let cron = ParsedCron::parse("*/1 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let first = cron.next_occurrence(after, chrono_tz::UTC).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap());
        let second = cron.next_occurrence(first, chrono_tz::UTC).unwrap();
        assert_eq!(second, Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap());
        let third = cron.next_occurrence(second, chrono_tz::UTC).unwrap();
        assert_eq!(third, Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap());
    }

    #[test]
    fn test_dst_spring_forward_skips_nonexistent_local_time() {
        // US/Eastern springs forward at 02:00 local -> 03:00 local on
        // 2024-03-10, so 02:30 never occurs that day; since the expression
        // pins hour=2 exactly, the next match is the following day's 02:30,
        // not the same day's 03:30.
        let cron = ParsedCron::parse("30 2 * * *").unwrap();
        let tz: Tz = "US/Eastern".parse().unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let next = cron.next_occurrence(after, tz).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_dst_fall_back_picks_first_pre_repeat_instant() {
        // US/Eastern falls back at 02:00 EDT -> 01:00 EST on 2024-11-03, so
        // 01:30 local occurs twice that day; the earlier (EDT) mapping wins.
        let cron = ParsedCron::parse("30 1 * * *").unwrap();
        let tz: Tz = "US/Eastern".parse().unwrap();
        let after = Utc.with_ymd_and_hms(2024, 11, 3, 4, 0, 0).unwrap();
        let next = cron.next_occurrence(after, tz).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap());
    }

    #[test]
    fn test_requires_sub_minute_resolution() {
        assert!(!ParsedCron::parse("* * * * *").unwrap().requires_sub_minute_resolution());
        assert!(!ParsedCron::parse("0 * * * * *").unwrap().requires_sub_minute_resolution());
        assert!(ParsedCron::parse("*/10 * * * * *").unwrap().requires_sub_minute_resolution());
    }

    #[test]
    fn test_parse_timezone_defaults_to_utc() {
        assert_eq!(parse_timezone(None).unwrap(), chrono_tz::UTC);
        assert_eq!(parse_timezone(Some("")).unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn test_parse_timezone_rejects_unknown() {
        assert!(parse_timezone(Some("Not/AZone")).is_err());
    }

    #[test]
    fn test_step_range_value() {
        let cron = ParsedCron::parse("10-40/5 * * * *").unwrap();
        let dt_match = Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap();
        assert!(cron.matches(dt_match, chrono_tz::UTC));
        let dt_no = Utc.with_ymd_and_hms(2024, 1, 1, 0, 17, 0).unwrap();
        assert!(!cron.matches(dt_no, chrono_tz::UTC));
        let dt_out_of_range = Utc.with_ymd_and_hms(2024, 1, 1, 0, 45, 0).unwrap();
        assert!(!cron.matches(dt_out_of_range, chrono_tz::UTC));
    }
}
