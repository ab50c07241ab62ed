use chrono::NaiveDateTime;

/// EXIF date/time layout: `YYYY:MM:DD HH:MM:SS`, 24-hour, zero-padded.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

pub fn format_exif_datetime(dt: &NaiveDateTime) -> String {
    dt.format(EXIF_DATETIME_FORMAT).to_string()
}

/// Parse an EXIF date string. Cameras are sloppy with separators, so `-`,
/// `/`, `\` and `.` are all read as `:`. A bare date maps to midnight.
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .trim_end_matches('\0')
        .trim()
        .replace(['-', '/', '\\', '.'], ":");

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, EXIF_DATETIME_FORMAT) {
        return Some(dt);
    }

    let date_part = cleaned.split(' ').next()?;
    let d = chrono::NaiveDate::parse_from_str(date_part, "%Y:%m:%d").ok()?;
    d.and_hms_opt(0, 0, 0)
}
