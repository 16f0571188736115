//! Calendar-date helpers shared by ledger backends and the engine.
//!
//! Records carry dates as ISO 8601 strings (`YYYY-MM-DD`). Anything that
//! needs arithmetic parses them with `time` first.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime};

/// Parse a `YYYY-MM-DD` date. A trailing time component (`2024-01-15T10:00:00Z`
/// or `2024-01-15 10:00:00`) is ignored.
pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    let trimmed = s.trim();
    let date_part = match trimmed.char_indices().nth(10) {
        Some((idx, 'T')) | Some((idx, ' ')) => &trimmed[..idx],
        _ => trimmed,
    };
    Date::parse(date_part, format_description!("[year]-[month]-[day]"))
}

/// The same day-of-month `months` months earlier, clamped to the last day of
/// the target month (`2024-03-31` minus one month is `2024-02-29`).
pub fn months_before(date: Date, months: u32) -> Date {
    let index = i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1
        - i64::from(months);
    let year = index.div_euclid(12);
    let month_number = (index.rem_euclid(12) + 1) as u8;
    let (Ok(year), Ok(month)) = (i32::try_from(year), Month::try_from(month_number)) else {
        return Date::MIN;
    };
    let mut day = date.day();
    loop {
        if let Ok(d) = Date::from_calendar_date(year, month, day) {
            return d;
        }
        if day <= 28 {
            return Date::MIN;
        }
        day -= 1;
    }
}

/// Today's date in UTC.
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn parses_plain_and_timestamped_dates() {
        assert_eq!(parse_date("2024-01-15").unwrap(), date!(2024 - 01 - 15));
        assert_eq!(
            parse_date("2024-01-15T08:30:00Z").unwrap(),
            date!(2024 - 01 - 15)
        );
        assert_eq!(
            parse_date(" 2024-01-15 08:30:00 ").unwrap(),
            date!(2024 - 01 - 15)
        );
        assert!(parse_date("15/01/2024").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn months_before_crosses_year_boundary() {
        assert_eq!(months_before(date!(2024 - 12 - 20), 24), date!(2022 - 12 - 20));
        assert_eq!(months_before(date!(2024 - 02 - 10), 3), date!(2023 - 11 - 10));
        assert_eq!(months_before(date!(2024 - 05 - 01), 0), date!(2024 - 05 - 01));
    }

    #[test]
    fn months_before_clamps_to_month_end() {
        assert_eq!(months_before(date!(2024 - 03 - 31), 1), date!(2024 - 02 - 29));
        assert_eq!(months_before(date!(2023 - 03 - 31), 1), date!(2023 - 02 - 28));
        assert_eq!(months_before(date!(2024 - 07 - 31), 1), date!(2024 - 06 - 30));
    }
}
