use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::{Deserialize, Serialize};

/// Offset used for ingestion timestamps (Brasília, no daylight saving since 2019).
pub const BRASILIA_OFFSET_SECONDS: i32 = 3 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn brasilia() -> FixedOffset {
    FixedOffset::west_opt(BRASILIA_OFFSET_SECONDS).expect("offset within one day")
}

pub fn now_brasilia() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&brasilia())
}

/// Raw header cleanup applied before any mapping lookup.
pub fn normalize_raw_column_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Decodes `YYYYMMDD` codes. Anything else, including impossible dates, is `None`.
pub fn decode_compact_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d").ok()
}

/// Decodes `YYYYMM` month codes into the first day of that month.
pub fn decode_compact_month(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = trimmed[..4].parse::<i32>().ok()?;
    let month = trimmed[4..].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn is_zero_sentinel(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b == b'0')
}

/// `"1"` is true, `"0"` is false, everything else has no value.
pub fn decode_flag(value: &str) -> Option<bool> {
    match value {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// Parses through `f64` so blank and padded inputs behave the same for every
/// numeric column. `Ok(None)` means the cell is blank.
pub fn parse_float(value: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<f64>().map(Some)
}

/// Integer cast from the intermediate float, truncating toward zero.
pub fn float_to_integer(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let truncated = value.trunc();
    if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}

/// Keeps the literal when it is a plain decimal, falling back to the float
/// representation for exponent forms such as `1e3`.
pub fn to_decimal(literal: &str, value: f64) -> Option<Decimal> {
    Decimal::from_str(literal.trim())
        .ok()
        .or_else(|| Decimal::from_f64(value))
}

pub fn parse_boolean_token(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "s" | "sim" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "nao" | "não" | "0" => Some(false),
        _ => None,
    }
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%Y%m%d"];
    let trimmed = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Timestamps without an offset are read as Brasília local time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(trimmed, fmt)
            .ok()
            .and_then(|naive| brasilia().from_local_datetime(&naive).single())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compact_date_decodes_exact_calendar_day() {
        assert_eq!(
            decode_compact_date("20210817"),
            NaiveDate::from_ymd_opt(2021, 8, 17)
        );
        assert_eq!(
            decode_compact_date(" 19991231 "),
            NaiveDate::from_ymd_opt(1999, 12, 31)
        );
    }

    #[test]
    fn compact_date_rejects_invalid_codes_without_failing() {
        for code in ["", "00000000", "20210231", "2021081", "2021-08-17", "abcdefgh"] {
            assert_eq!(decode_compact_date(code), None, "code {code:?}");
        }
    }

    #[test]
    fn compact_month_uses_first_day() {
        assert_eq!(
            decode_compact_month("202108"),
            NaiveDate::from_ymd_opt(2021, 8, 1)
        );
        assert_eq!(decode_compact_month("202113"), None);
        assert_eq!(decode_compact_month("000000"), None);
    }

    #[test]
    fn zero_sentinel_requires_only_zeros() {
        assert!(is_zero_sentinel("0"));
        assert!(is_zero_sentinel("000000"));
        assert!(!is_zero_sentinel(""));
        assert!(!is_zero_sentinel("000100"));
        assert!(!is_zero_sentinel("0 0"));
    }

    #[test]
    fn flags_decode_only_zero_and_one() {
        assert_eq!(decode_flag("0"), Some(false));
        assert_eq!(decode_flag("1"), Some(true));
        assert_eq!(decode_flag(""), None);
        assert_eq!(decode_flag("2"), None);
        assert_eq!(decode_flag("true"), None);
    }

    #[test]
    fn numeric_parsing_tolerates_blanks_and_truncates() {
        assert_eq!(parse_float("   ").unwrap(), None);
        assert_eq!(parse_float(" 12 ").unwrap(), Some(12.0));
        assert!(parse_float("12a").is_err());
        assert_eq!(float_to_integer(3.9), Some(3));
        assert_eq!(float_to_integer(-3.9), Some(-3));
        assert_eq!(float_to_integer(f64::NAN), None);
    }

    #[test]
    fn decimal_keeps_exact_literal() {
        let value = to_decimal("1234.56", 1234.56).unwrap();
        assert_eq!(value.to_string(), "1234.56");
        let exponent = to_decimal("1e3", 1000.0).unwrap();
        assert_eq!(exponent, Decimal::from(1000));
    }

    #[test]
    fn timestamps_without_offset_are_brasilia_local() {
        let parsed = parse_timestamp("2022-03-01 10:00:00").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), -BRASILIA_OFFSET_SECONDS);
        assert_eq!(parsed.to_rfc3339(), "2022-03-01T10:00:00-03:00");
    }

    #[test]
    fn raw_column_names_are_trimmed_and_uppercased() {
        assert_eq!(normalize_raw_column_name("  munic_mov "), "MUNIC_MOV");
    }

    proptest! {
        #[test]
        fn compact_date_round_trips_every_valid_day(days in 0i64..60_000) {
            let date = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap() + chrono::Duration::days(days);
            let code = date.format("%Y%m%d").to_string();
            prop_assert_eq!(decode_compact_date(&code), Some(date));
        }

        #[test]
        fn compact_date_never_panics(input in "\\PC{0,12}") {
            let _ = decode_compact_date(&input);
        }

        #[test]
        fn zero_sentinel_only_matches_all_zero_strings(digits in "[0-9]{1,10}") {
            prop_assert_eq!(is_zero_sentinel(&digits), digits.chars().all(|c| c == '0'));
        }
    }
}
