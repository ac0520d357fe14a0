//! RFC 822 timestamp formatting for the `@mdate` attribute (§6):
//! `"%a, %d %b %Y %H:%M:%S +0000"`, always GMT.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::config::MAILESTD_TIMEFMT;

pub fn format_mdate(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format(MAILESTD_TIMEFMT).to_string()
}

/// Parses a stored `@mdate` string back into a `SystemTime`. Used by
/// `SyncDb` to recover the filesystem mtime the index believed it had.
pub fn parse_mdate(s: &str) -> Option<SystemTime> {
    let without_offset = s.trim_end_matches(" +0000");
    let naive = chrono::NaiveDateTime::parse_from_str(without_offset, "%a, %d %b %Y %H:%M:%S").ok()?;
    let dt = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
    Some(dt.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn format_then_parse_round_trips_to_the_second() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let formatted = format_mdate(t);
        assert!(formatted.ends_with("+0000"));
        let parsed = parse_mdate(&formatted).unwrap();
        assert_eq!(parsed, t);
    }
}
