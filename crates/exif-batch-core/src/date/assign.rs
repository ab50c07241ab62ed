use chrono::{NaiveDateTime, TimeDelta, Timelike};

/// Derive one timestamp per photo from a base date.
///
/// Element `i` is `base` with its seconds set to `i`. The base's own seconds
/// and sub-seconds are discarded. Past 59 the seconds carry into minutes and
/// hours by ordinary calendar arithmetic.
pub fn assign(base: NaiveDateTime, count: usize) -> Vec<NaiveDateTime> {
    let anchor = truncate_to_minute(base);
    (0..count)
        .map(|i| anchor + TimeDelta::seconds(i as i64))
        .collect()
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt - TimeDelta::seconds(i64::from(dt.second()))
        - TimeDelta::nanoseconds(i64::from(dt.nanosecond()))
}
