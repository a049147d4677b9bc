use chrono::{DateTime, Utc};
use std::time::Duration;

pub struct StrConv;

impl StrConv {
    pub fn timestamp_to_sfstring(timestamp: DateTime<Utc>) -> String {
        timestamp.format("%x %X").to_string()
    }

    /// Renders a duration the way krb5 tools print lifetimes, e.g. `1d 02:03:04`.
    pub fn duration_to_string(duration: Duration) -> String {
        let secs = duration.as_secs();
        let (days, rest) = (secs / 86400, secs % 86400);
        let (hours, minutes, seconds) = (rest / 3600, rest % 3600 / 60, rest % 60);
        match days {
            0 => format!("{:02}:{:02}:{:02}", hours, minutes, seconds),
            days => format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds),
        }
    }
}
