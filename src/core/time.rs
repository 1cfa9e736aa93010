//! Run timestamps and elapsed-time rendering for status lines and logs.

use chrono::{DateTime, Local};
use std::time::Duration;

/// Format used for `{rundate}` in file names, log names and email subjects.
pub const RUNDATE_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Returns the run timestamp for `now` (e.g. `20240131-235959`).
pub fn rundate(now: DateTime<Local>) -> String {
    now.format(RUNDATE_FORMAT).to_string()
}

/// Renders an elapsed duration as `S.SS sec`, `MM min SS.SS sec` or
/// `H h MM min SS.SS sec`.
pub fn format_elapsed(elapsed: Duration) -> String {
    // Round to hundredths before splitting into units.
    let centis = (elapsed.as_secs_f64() * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis % 360_000) / 6_000;
    let seconds = (centis % 6_000) as f64 / 100.0;

    if hours > 0 {
        format!("{} h {:02} min {:05.2} sec", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{:02} min {:05.2} sec", minutes, seconds)
    } else {
        format!("{:05.2} sec", seconds)
    }
}
