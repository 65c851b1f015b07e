//! Duration strings used throughout fleet config (`"5s"`, `"500ms"`, `"2m"`).

use std::time::Duration;

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds. Values that do not fit a `u64` count
/// of seconds answer `None`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(digits_end);
    let value: u64 = value.parse().ok()?;

    match unit.trim() {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}
