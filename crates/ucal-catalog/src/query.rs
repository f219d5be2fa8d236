use std::cmp::Ordering;
use std::ops::Bound;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use ucal_core::errors::{ErrorInfo, UcalError};
use ucal_core::{MetaValue, RunRecord};

fn config_error(code: &str, message: &str, value: &str) -> UcalError {
    UcalError::Config(ErrorInfo::new(code, message).with_context("value", value))
}

/// Metadata predicate evaluated against a run record.
///
/// Runs lacking the field a predicate inspects never match; they are
/// excluded, not reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Stop document reports `exit_status == "success"`.
    Success,
    /// Dotted path equals the value.
    Eq {
        /// Dotted metadata path.
        key: String,
        /// Required value.
        value: MetaValue,
    },
    /// Dotted path is one of the values.
    In {
        /// Dotted metadata path.
        key: String,
        /// Accepted values.
        values: Vec<MetaValue>,
    },
    /// Dotted path lies within the bounds; values of another kind never match.
    Range {
        /// Dotted metadata path.
        key: String,
        /// Lower bound.
        lower: Bound<MetaValue>,
        /// Upper bound.
        upper: Bound<MetaValue>,
    },
    /// Acquisition time (`start.time`) in `[since, until)`.
    TimeRange(TimeRange),
    /// Uid starts with one of the given prefixes.
    Uids(Vec<String>),
    /// Conjunction of predicates.
    All(Vec<Query>),
}

impl Query {
    /// Equality on a dotted path.
    pub fn eq(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Query::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Set membership on a dotted path.
    pub fn one_of<V: Into<MetaValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Query::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `key >= value`.
    pub fn at_least(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Query::Range {
            key: key.into(),
            lower: Bound::Included(value.into()),
            upper: Bound::Unbounded,
        }
    }

    /// `key <= value`.
    pub fn at_most(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Query::Range {
            key: key.into(),
            lower: Bound::Unbounded,
            upper: Bound::Included(value.into()),
        }
    }

    /// `key > value`.
    pub fn greater_than(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Query::Range {
            key: key.into(),
            lower: Bound::Excluded(value.into()),
            upper: Bound::Unbounded,
        }
    }

    /// `key < value`.
    pub fn less_than(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Query::Range {
            key: key.into(),
            lower: Bound::Unbounded,
            upper: Bound::Excluded(value.into()),
        }
    }

    /// Evaluates the predicate for one run.
    pub fn matches(&self, run: &RunRecord) -> bool {
        match self {
            Query::Success => run.succeeded(),
            Query::Eq { key, value } => run.meta_value(key).as_ref() == Some(value),
            Query::In { key, values } => match run.meta_value(key) {
                Some(found) => values.contains(&found),
                None => false,
            },
            Query::Range { key, lower, upper } => match run.meta_value(key) {
                Some(found) => within(&found, lower, upper),
                None => false,
            },
            Query::TimeRange(range) => run.time().is_some_and(|time| range.contains(time)),
            Query::Uids(prefixes) => prefixes
                .iter()
                .any(|prefix| run.uid().starts_with(prefix.as_str())),
            Query::All(queries) => queries.iter().all(|query| query.matches(run)),
        }
    }
}

fn within(value: &MetaValue, lower: &Bound<MetaValue>, upper: &Bound<MetaValue>) -> bool {
    let lower_ok = match lower {
        Bound::Unbounded => true,
        Bound::Included(bound) => matches!(
            value.partial_compare(bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Bound::Excluded(bound) => matches!(value.partial_compare(bound), Some(Ordering::Greater)),
    };
    let upper_ok = match upper {
        Bound::Unbounded => true,
        Bound::Included(bound) => matches!(
            value.partial_compare(bound),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Bound::Excluded(bound) => matches!(value.partial_compare(bound), Some(Ordering::Less)),
    };
    lower_ok && upper_ok
}

/// Half-open acquisition time window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub since: Option<f64>,
    /// Exclusive upper bound.
    pub until: Option<f64>,
}

impl TimeRange {
    /// Builds a window from date strings (`YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339).
    pub fn parse(since: Option<&str>, until: Option<&str>) -> Result<Self, UcalError> {
        Ok(Self {
            since: since.map(parse_timestamp).transpose()?,
            until: until.map(parse_timestamp).transpose()?,
        })
    }

    /// True when `time` lies in the window.
    pub fn contains(&self, time: f64) -> bool {
        self.since.map_or(true, |since| time >= since)
            && self.until.map_or(true, |until| time < until)
    }
}

/// Parses a date or datetime string as UTC unix seconds.
pub fn parse_timestamp(text: &str) -> Result<f64, UcalError> {
    parse_datetime(text).map(|datetime| datetime.timestamp_millis() as f64 / 1000.0)
}

/// Parses a date or datetime string as a UTC datetime.
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, UcalError> {
    let text = text.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Ok(datetime.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| config_error("query.timestamp", "unrecognised date format", text))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| config_error("query.timestamp", "invalid calendar date", text))
}

/// ISO formatted string one day after `since`, used as the default beamtime window end.
pub fn one_day_after(since: &str) -> Result<String, UcalError> {
    let start = parse_datetime(since)?;
    Ok((start + Duration::days(1))
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(start: serde_json::Value) -> RunRecord {
        RunRecord::new("uid-1", start.as_object().cloned().unwrap()).unwrap()
    }

    #[test]
    fn scan_range_bounds_are_inclusive() {
        let record = run(json!({"scan_id": 10}));
        let query = Query::All(vec![
            Query::at_least("scan_id", 10i64),
            Query::at_most("scan_id", 10i64),
        ]);
        assert!(query.matches(&record));
        assert!(!Query::greater_than("scan_id", 10i64).matches(&record));
    }

    #[test]
    fn float_values_meet_integer_bounds() {
        let record = run(json!({"scan_id": 1, "adr_current": 10.0}));
        assert!(Query::at_most("adr_current", 10i64).matches(&record));
        assert!(Query::at_least("adr_current", 10i64).matches(&record));
        assert!(!Query::less_than("adr_current", 10i64).matches(&record));
    }

    #[test]
    fn kind_mismatch_never_matches() {
        let record = run(json!({"scan_id": 1, "beamtime_start": "2024-03-01"}));
        assert!(!Query::at_least("beamtime_start", 3i64).matches(&record));
        assert!(Query::greater_than("beamtime_start", "2024-02-28").matches(&record));
    }

    #[test]
    fn time_range_is_half_open() {
        let range = TimeRange::parse(Some("2024-01-01"), Some("2024-01-02")).unwrap();
        let day = 86_400.0;
        let since = range.since.unwrap();
        assert!(range.contains(since));
        assert!(range.contains(since + day - 1.0));
        assert!(!range.contains(since + day));
    }

    #[test]
    fn one_day_after_rolls_the_calendar() {
        assert_eq!(one_day_after("2024-02-28").unwrap(), "2024-02-29T00:00:00");
    }
}
