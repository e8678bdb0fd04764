//! Parsing of the transfer tool's free-text progress and summary output.

use regex::Regex;
use std::sync::LazyLock;

// "Transferred:   12.500 MiB / 12.500 MiB, 100%, 1.2 MiB/s, ETA 0s"
// The file-count variant ("Transferred: 3 / 3, 100%") carries no unit and
// does not match.
static TRANSFERRED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transferred:\s+([\d.]+)\s*([A-Za-z]+)").expect("transferred pattern is valid")
});

/// Bytes reported by the last `Transferred:` line, or 0 when there is none.
///
/// Progress updates repeat the line periodically; only the final one is
/// authoritative.
pub fn parse_transferred_bytes(output: &str) -> u64 {
    let Some(caps) = TRANSFERRED_RE.captures_iter(output).last() else {
        return 0;
    };

    let value: f64 = match caps[1].parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };

    (value * unit_multiplier(&caps[2]) as f64) as u64
}

/// The last `Transferred:` line carrying a byte count, trimmed.
pub fn final_transfer_line(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .find(|line| TRANSFERRED_RE.is_match(line))
        .map(str::trim)
}

/// 1024-based multiplier for a size unit such as `B`, `KiB`, `MB`, `GBytes`.
pub fn unit_multiplier(unit: &str) -> u64 {
    let first = unit.chars().next().map(|c| c.to_ascii_uppercase());
    let exponent = match first {
        Some('K') => 1,
        Some('M') => 2,
        Some('G') => 3,
        Some('T') => 4,
        Some('P') => 5,
        _ => 0,
    };
    1024u64.pow(exponent)
}
