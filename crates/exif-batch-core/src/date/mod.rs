pub mod assign;
pub mod exif;

use chrono::NaiveDateTime;

pub use assign::assign;
pub use exif::{format_exif_datetime, parse_exif_datetime};

/// Input forms accepted for a base date, tried in order.
const BASE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a user-supplied base date.
///
/// Accepts the `datetime-local` form (`2024-01-01T10:00`), a space-separated
/// variant, and anything [`parse_exif_datetime`] understands.
pub fn parse_base_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    BASE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_exif_datetime(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_parse_base_date_forms() {
        assert_eq!(parse_base_date("2024-01-01T10:00"), Some(dt(10, 0, 0)));
        assert_eq!(parse_base_date("2024-01-01T10:00:42"), Some(dt(10, 0, 42)));
        assert_eq!(parse_base_date("2024-01-01 10:05"), Some(dt(10, 5, 0)));
        assert_eq!(parse_base_date("2024:01:01 23:59:59"), Some(dt(23, 59, 59)));
        assert_eq!(parse_base_date("  2024-01-01T10:00  "), Some(dt(10, 0, 0)));
    }

    #[test]
    fn test_parse_base_date_rejects_garbage() {
        assert_eq!(parse_base_date(""), None);
        assert_eq!(parse_base_date("yesterday"), None);
        assert_eq!(parse_base_date("2024-13-01T10:00"), None);
    }
}
