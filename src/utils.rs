//! Small formatting helpers shared by the driver and the binary

/// Format duration in seconds to MM:SS.SS format
pub fn format_duration(duration_secs: f64) -> String {
    let minutes = (duration_secs / 60.0) as u64;
    let seconds = duration_secs % 60.0;
    format!("{:02}:{:05.2}", minutes, seconds)
}

/// Signal index encoded at the end of a result file stem, e.g. `1_signal_17`.
pub fn signal_index_from_stem(stem: &str) -> Option<usize> {
    stem.rsplit('_').next()?.parse().ok()
}
