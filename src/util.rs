use chrono::{DateTime, Utc};

// Renders unix seconds the way the node logs them, e.g. "2019-01-06 15:58:38".
pub fn epoch_time_to_human_readable(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<invalid time {}>", timestamp),
    }
}
