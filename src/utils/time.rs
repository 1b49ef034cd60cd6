use chrono::{DateTime, Utc};

/// Milliseconds elapsed between two moments. Wall clocks can step backwards, in which case the
/// span counts as empty.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

/// Formats milliseconds the way the popup shows them: minutes, with hours once there are any.
pub fn format_ms(ms: u64) -> String {
    let minutes = ms / (1000 * 60);
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}
