//! Prometheus-style duration strings (`30s`, `1m`, `1h30m`, `2d`).
//!
//! Units must appear in descending order (`y`, `w`, `d`, `h`, `m`, `s`,
//! `ms`), each at most once. The bare string `0` is accepted as zero.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(\d+)y)?(?:(\d+)w)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?(?:(\d+)ms)?$",
    )
    .expect("duration pattern is valid")
});

/// Milliseconds per capture group, in pattern order.
const UNIT_MILLIS: [u64; 7] = [
    365 * 24 * 3600 * 1000,
    7 * 24 * 3600 * 1000,
    24 * 3600 * 1000,
    3600 * 1000,
    60 * 1000,
    1000,
    1,
];

/// Parse a duration string. Returns `None` for empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }
    let caps = DURATION_RE.captures(s)?;
    let mut total: u64 = 0;
    for (i, unit) in UNIT_MILLIS.iter().enumerate() {
        if let Some(m) = caps.get(i + 1) {
            let n: u64 = m.as_str().parse().ok()?;
            total = total.checked_add(n.checked_mul(*unit)?)?;
        }
    }
    Some(Duration::from_millis(total))
}

/// Whether `s` is a well-formed duration string.
pub fn is_valid_duration(s: &str) -> bool {
    parse_duration(s).is_some()
}
