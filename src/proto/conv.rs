use chrono::{DateTime, Local};

/// Timestamp suffix of an output directory, e.g. `10-18-2026 @ 02.05.09PM`.
pub fn folder_ts(ts: &DateTime<Local>) -> String {
    ts.format("%m-%d-%Y @ %I.%M.%S%p").to_string()
}

pub fn pretty_ts(ts: &DateTime<Local>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
