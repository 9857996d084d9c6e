//! Pure occurrence computation for each [`ScheduleKind`] (`spec.md` §4.3).
//!
//! `cron` occurrences are computed in naive local wall-clock time and then
//! resolved against the task's IANA timezone by hand, so the DST policy is
//! explicit and testable: a wall-clock time that does not exist on a
//! spring-forward day is skipped (the next candidate from the schedule is
//! tried), and a wall-clock time that occurs twice on a fall-back day
//! resolves to its first (pre-transition) instance.
//!
//! `rrule` occurrences are computed directly against [`rrule::Tz`], which
//! already threads an IANA zone through RFC 5545 expansion.

use std::str::FromStr;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use thiserror::Error;

use orka_core::ScheduleKind;

#[derive(Debug, Error, Clone)]
pub enum OccurrenceError {
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid schedule expression '{expr}' for {kind:?}: {message}")]
    InvalidExpression {
        kind: ScheduleKind,
        expr: String,
        message: String,
    },
}

/// A cron schedule is searched this many candidates deep before giving up —
/// a safety bound, not a real limit any valid cron expression should hit.
const MAX_CRON_CANDIDATES: usize = 400;

pub fn parse_timezone(tz_name: &str) -> Result<Tz, OccurrenceError> {
    Tz::from_str(tz_name).map_err(|_| OccurrenceError::InvalidTimezone(tz_name.to_string()))
}

fn normalize_cron_expr(expr: &str) -> String {
    // Accept the conventional 5-field unix cron form (`spec.md` §3 examples)
    // by defaulting the seconds field the `cron` crate requires to 0.
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// The next cron occurrence strictly after `after_utc`, expressed in
/// `tz`'s wall clock, resolved to a UTC instant per the DST policy above.
pub fn next_cron_occurrence(
    expr: &str,
    tz: Tz,
    after_utc: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, OccurrenceError> {
    let normalized = normalize_cron_expr(expr);
    let schedule = CronSchedule::from_str(&normalized).map_err(|e| OccurrenceError::InvalidExpression {
        kind: ScheduleKind::Cron,
        expr: expr.to_string(),
        message: e.to_string(),
    })?;

    // `cron`'s iterator only understands a bare `DateTime<Utc>` clock; feed
    // it the task's local wall-clock values dressed as UTC so each yielded
    // candidate is itself a local naive wall-clock reading.
    let after_local_naive = after_utc.with_timezone(&tz).naive_local();
    let seed = Utc.from_utc_datetime(&after_local_naive);

    for (i, candidate) in schedule.after(&seed).enumerate() {
        if i >= MAX_CRON_CANDIDATES {
            break;
        }
        let candidate_naive: NaiveDateTime = candidate.naive_utc();
        match tz.from_local_datetime(&candidate_naive) {
            LocalResult::Single(dt) => return Ok(Some(dt.with_timezone(&Utc))),
            LocalResult::Ambiguous(earliest, _latest) => {
                return Ok(Some(earliest.with_timezone(&Utc)))
            }
            LocalResult::None => continue,
        }
    }
    Ok(None)
}

/// The next rrule occurrence strictly after `after_utc`.
pub fn next_rrule_occurrence(
    expr: &str,
    tz: Tz,
    dtstart_utc: DateTime<Utc>,
    after_utc: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, OccurrenceError> {
    let dtstart_local = dtstart_utc.with_timezone(&tz);
    let full = format!(
        "DTSTART;TZID={}:{}\nRRULE:{}",
        tz,
        dtstart_local.format("%Y%m%dT%H%M%S"),
        expr
    );

    let rrule_set: rrule::RRuleSet = full.parse().map_err(|e| OccurrenceError::InvalidExpression {
        kind: ScheduleKind::Rrule,
        expr: expr.to_string(),
        message: e.to_string(),
    })?;

    let rtz = rrule::Tz::Tz(tz);
    let after = after_utc.with_timezone(&rtz);
    let result = rrule_set.after(after).all(1);

    Ok(result.dates.into_iter().next().map(|d| d.with_timezone(&Utc)))
}

/// `once` occurrences fire exactly one instant, parsed directly out of
/// `schedule_expr` as an RFC 3339 timestamp.
pub fn once_occurrence(expr: &str) -> Result<DateTime<Utc>, OccurrenceError> {
    DateTime::parse_from_rfc3339(expr)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OccurrenceError::InvalidExpression {
            kind: ScheduleKind::Once,
            expr: expr.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spring_forward_gap_skips_to_next_valid_day() {
        let tz = parse_timezone("Europe/Chisinau").unwrap();
        // Scheduler started 2025-03-29 12:00 local.
        let started_local = tz.with_ymd_and_hms(2025, 3, 29, 12, 0, 0).unwrap();
        let started_utc = started_local.with_timezone(&Utc);

        let next = next_cron_occurrence("30 2 * * *", tz, started_utc)
            .unwrap()
            .unwrap();

        // 2025-03-30 02:30 local does not exist (DST jumps 02:00 -> 03:00);
        // the next candidate is 2025-03-31 02:30 local = 2025-03-30 23:30Z.
        let expected = Utc.with_ymd_and_hms(2025, 3, 30, 23, 30, 0).unwrap();
        assert_eq!(next, expected);
    }

    #[test]
    fn once_occurrence_parses_rfc3339() {
        let occ = once_occurrence("2030-01-01T10:00:00Z").unwrap();
        assert_eq!(occ, Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        assert!(parse_timezone("Not/AZone").is_err());
    }
}
