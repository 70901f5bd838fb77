// Date and time builtins
// UTC only: timestamps are seconds since the Unix epoch as numbers

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

use crate::value::JValue;

/// Format used by `todate` and `fromdate`.
pub const ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

/// DateTime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateTimeError {
    #[error("date \"{input}\" does not match format \"{format}\"")]
    ParseError { input: String, format: String },

    #[error("{0}")]
    FormatError(String),

    #[error("{0}")]
    InputError(String),
}

/// `now`: current time with sub-second precision.
pub fn now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

fn from_timestamp(t: f64) -> Result<DateTime<Utc>, DateTimeError> {
    if !t.is_finite() {
        return Err(DateTimeError::InputError(format!("timestamp {} is out of range", t)));
    }
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        .ok_or_else(|| DateTimeError::InputError(format!("timestamp {} is out of range", t)))
}

/// Broken-down time: `[year, month0, mday, hours, minutes, seconds, wday, yday]`.
fn broken_down(dt: &NaiveDateTime, fraction: f64) -> JValue {
    let fields = [
        dt.year() as f64,
        dt.month0() as f64,
        dt.day() as f64,
        dt.hour() as f64,
        dt.minute() as f64,
        dt.second() as f64 + fraction,
        dt.weekday().num_days_from_sunday() as f64,
        dt.ordinal0() as f64,
    ];
    fields.into_iter().map(JValue::Number).collect()
}

/// Inverse of `broken_down`. Out-of-range fields carry over the way
/// `timegm` normalizes them; weekday and yearday are ignored.
fn from_broken_down(value: &JValue, who: &str) -> Result<(NaiveDateTime, f64), DateTimeError> {
    let invalid = || DateTimeError::InputError(format!("{} requires parsed datetime inputs", who));
    let JValue::Array(fields) = value else {
        return Err(invalid());
    };
    if fields.len() < 6 {
        return Err(invalid());
    }
    let mut nums = [0f64; 6];
    for (slot, field) in nums.iter_mut().zip(fields.iter()) {
        *slot = field.as_f64().ok_or_else(invalid)?;
    }
    let [year, month0, mday, hours, minutes, seconds] = nums;

    let month0 = month0.floor() as i64;
    let year = year.floor() as i64 + month0.div_euclid(12);
    let month = month0.rem_euclid(12) as u32 + 1;
    let start = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| DateTimeError::InputError(format!("year {} is out of range", year)))?;
    let whole_secs = seconds.floor();
    let offset = Duration::try_days(mday.floor() as i64 - 1)
        .zip(Duration::try_hours(hours.floor() as i64))
        .zip(Duration::try_minutes(minutes.floor() as i64))
        .zip(Duration::try_seconds(whole_secs as i64))
        .map(|(((d, h), m), s)| d + h + m + s)
        .ok_or_else(invalid)?;
    let dt = start
        .checked_add_signed(offset)
        .ok_or_else(|| DateTimeError::InputError(format!("{} is out of range", value)))?;
    Ok((dt, seconds - whole_secs))
}

fn checked_items(format: &str) -> Result<Vec<Item<'_>>, DateTimeError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(DateTimeError::FormatError(format!("\"{}\" is not a valid date format", format)));
    }
    Ok(items)
}

/// `gmtime`: seconds since the epoch to broken-down UTC time.
pub fn gmtime(value: &JValue) -> Result<JValue, DateTimeError> {
    let t = value
        .as_f64()
        .ok_or_else(|| DateTimeError::InputError("gmtime() requires a number".into()))?;
    let dt = from_timestamp(t)?;
    Ok(broken_down(&dt.naive_utc(), t - t.floor()))
}

/// `mktime`: broken-down UTC time to whole seconds since the epoch.
pub fn mktime(value: &JValue) -> Result<JValue, DateTimeError> {
    let (dt, _) = from_broken_down(value, "mktime")
        .map_err(|_| DateTimeError::InputError("mktime requires array of 6 numbers".into()))?;
    Ok(JValue::Number(dt.and_utc().timestamp() as f64))
}

/// `strftime(fmt)` on a timestamp or a broken-down time.
pub fn strftime(value: &JValue, format: &JValue) -> Result<JValue, DateTimeError> {
    let JValue::String(format) = format else {
        return Err(DateTimeError::InputError("strftime/1 requires a string format".into()));
    };
    let dt = match value {
        JValue::Number(t) => from_timestamp(*t)?.naive_utc(),
        JValue::Array(_) => from_broken_down(value, "strftime/1")?.0,
        _ => {
            return Err(DateTimeError::InputError(
                "strftime/1 requires parsed datetime inputs".into(),
            ))
        }
    };
    let items = checked_items(format)?;
    Ok(JValue::string(dt.format_with_items(items.into_iter()).to_string()))
}

/// `strptime(fmt)`: parse a string into broken-down UTC time. Formats with
/// an offset are converted to UTC; date-only formats give midnight.
pub fn strptime(value: &JValue, format: &JValue) -> Result<JValue, DateTimeError> {
    let (JValue::String(input), JValue::String(format)) = (value, format) else {
        return Err(DateTimeError::InputError(
            "strptime/1 requires string inputs and arguments".into(),
        ));
    };
    checked_items(format)?;
    let parsed = DateTime::parse_from_str(input, format)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(input, format))
        .or_else(|_| NaiveDate::parse_from_str(input, format).map(|d| d.and_time(Default::default())))
        .map_err(|_| DateTimeError::ParseError {
            input: input.to_string(),
            format: format.to_string(),
        })?;
    Ok(broken_down(&parsed, 0.0))
}

/// `todate`: ISO 8601 text for a timestamp.
pub fn todate(value: &JValue) -> Result<JValue, DateTimeError> {
    strftime(value, &JValue::from(ISO8601))
}

/// `fromdate`: seconds since the epoch for ISO 8601 text.
pub fn fromdate(value: &JValue) -> Result<JValue, DateTimeError> {
    mktime(&strptime(value, &JValue::from(ISO8601))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvalue;

    #[test]
    fn test_now() {
        assert!(now() > 1_600_000_000.0);
    }

    #[test]
    fn test_gmtime() {
        assert_eq!(
            gmtime(&jvalue!(1425599621)).unwrap(),
            jvalue!([2015, 2, 5, 23, 53, 41, 4, 63])
        );
        assert_eq!(gmtime(&jvalue!(0.5)).unwrap(), jvalue!([1970, 0, 1, 0, 0, 0.5, 4, 0]));
        assert_eq!(
            gmtime(&jvalue!("x")).unwrap_err().to_string(),
            "gmtime() requires a number"
        );
    }

    #[test]
    fn test_mktime() {
        assert_eq!(mktime(&jvalue!([2015, 2, 5, 23, 53, 41, 4, 63])).unwrap(), jvalue!(1425599621));
        // Month 12 rolls into the next year.
        assert_eq!(mktime(&jvalue!([1969, 12, 1, 0, 0, 0])).unwrap(), jvalue!(0));
        assert_eq!(
            mktime(&jvalue!([1970, 0])).unwrap_err().to_string(),
            "mktime requires array of 6 numbers"
        );
    }

    #[test]
    fn test_strftime() {
        assert_eq!(strftime(&jvalue!(0), &jvalue!("%Y-%m-%d %H:%M")).unwrap(), jvalue!("1970-01-01 00:00"));
        assert_eq!(
            strftime(&jvalue!([2015, 2, 5, 23, 53, 41, 4, 63]), &jvalue!("%A, %B %d")).unwrap(),
            jvalue!("Thursday, March 05")
        );
        assert!(matches!(
            strftime(&jvalue!(0), &jvalue!(1)),
            Err(DateTimeError::InputError(_))
        ));
        assert!(matches!(
            strftime(&jvalue!(0), &jvalue!("%Q")),
            Err(DateTimeError::FormatError(_))
        ));
    }

    #[test]
    fn test_strptime() {
        assert_eq!(
            strptime(&jvalue!("2015-03-05T23:53:41Z"), &jvalue!(ISO8601)).unwrap(),
            jvalue!([2015, 2, 5, 23, 53, 41, 4, 63])
        );
        assert_eq!(
            strptime(&jvalue!("10 Jan 2020"), &jvalue!("%d %b %Y")).unwrap(),
            jvalue!([2020, 0, 10, 0, 0, 0, 5, 9])
        );
        assert_eq!(
            strptime(&jvalue!("2020-01-01T05:00:00+0200"), &jvalue!("%Y-%m-%dT%H:%M:%S%z")).unwrap(),
            jvalue!([2020, 0, 1, 3, 0, 0, 3, 0])
        );
        assert_eq!(
            strptime(&jvalue!("nope"), &jvalue!("%Y")).unwrap_err().to_string(),
            "date \"nope\" does not match format \"%Y\""
        );
    }

    #[test]
    fn test_iso_round_trip() {
        assert_eq!(todate(&jvalue!(1425599621)).unwrap(), jvalue!("2015-03-05T23:53:41Z"));
        assert_eq!(fromdate(&jvalue!("2015-03-05T23:53:41Z")).unwrap(), jvalue!(1425599621));
        assert!(fromdate(&jvalue!("2015-03-05")).is_err());
    }
}
