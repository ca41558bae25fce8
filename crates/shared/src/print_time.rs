//! `D:HH:MM:SS` rendering of print durations.
//!
//! Every slot is rendered independently: a zero component always prints as
//! `00`, a non-zero day count prints unpadded, and the remaining components
//! print zero-padded to two digits. A 30 second job therefore reads
//! `00:00:00:30` and a 25 hour job reads `1:01:00:00`.

use crate::domain::FileMetadata;

const ZERO_SLOT: &str = "00";

pub fn format_print_time(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds / 3_600) % 24;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;

    let days = if days > 0 {
        days.to_string()
    } else {
        ZERO_SLOT.to_string()
    };

    format!(
        "{days}:{}:{}:{}",
        padded_slot(hours),
        padded_slot(minutes),
        padded_slot(seconds)
    )
}

/// Print time shown for a file at the moment it is queued.
pub fn print_time_for(metadata: &FileMetadata) -> String {
    format_print_time(metadata.print_time_seconds().unwrap_or(0))
}

fn padded_slot(value: u64) -> String {
    if value > 0 {
        format!("{value:02}")
    } else {
        ZERO_SLOT.to_string()
    }
}
