use chrono::{DateTime, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Second-resolution stamp used to disambiguate colliding filenames.
pub fn stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}
