//! Caller identity and time collaborators.
//!
//! Commit requests default to the ambient user and the current UTC time;
//! both can be overridden explicitly, which is what the tests do.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

use crate::error::{StrataError, StrataResult};

/// The committing user's name, from `STRATA_USER`, `USER`, or `LOGNAME`.
pub fn current_user() -> String {
    for var in ["STRATA_USER", "USER", "LOGNAME"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    "unknown".to_string()
}

/// Format a timestamp in store form: `YY.mm.dd.HH.MM.SS` for years before
/// 2000 (the historical two-digit convention), `YYYY.mm.dd.HH.MM.SS` after.
pub fn format_store_date(when: DateTime<Utc>) -> String {
    let year = when.year();
    if year < 2000 {
        when.format("%y.%m.%d.%H.%M.%S").to_string()
    } else {
        when.format("%Y.%m.%d.%H.%M.%S").to_string()
    }
}

/// The current time in store form.
pub fn now_store_date() -> String {
    format_store_date(Utc::now())
}

/// Normalize a store date to a full-year dotted form so plain string
/// comparison orders dates chronologically. Two-digit years are 19xx.
pub fn normalize_store_date(date: &str) -> String {
    match date.split_once('.') {
        Some((year, rest)) if year.len() <= 2 => format!("19{year:0>2}.{rest}"),
        _ => date.to_string(),
    }
}

/// Parse a store date into a timestamp, for display.
pub fn parse_store_date(date: &str) -> StrataResult<NaiveDateTime> {
    let normalized = normalize_store_date(date);
    NaiveDateTime::parse_from_str(&normalized, "%Y.%m.%d.%H.%M.%S")
        .map_err(|_| StrataError::Semantic(format!("bad date `{date}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_two_digit_before_2000() {
        let old = Utc.with_ymd_and_hms(1997, 3, 5, 8, 9, 10).unwrap();
        assert_eq!(format_store_date(old), "97.03.05.08.09.10");
        let new = Utc.with_ymd_and_hms(2026, 3, 5, 8, 9, 10).unwrap();
        assert_eq!(format_store_date(new), "2026.03.05.08.09.10");
    }

    #[test]
    fn test_normalize_orders_across_century() {
        let old = normalize_store_date("97.03.05.08.09.10");
        let new = normalize_store_date("2026.03.05.08.09.10");
        assert!(old < new);
    }

    #[test]
    fn test_parse_store_date() {
        let parsed = parse_store_date("2026.03.05.08.09.10").unwrap();
        assert_eq!(parsed.to_string(), "2026-03-05 08:09:10");
        assert!(parse_store_date("not-a-date").is_err());
    }
}
