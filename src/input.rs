//! Normalization of the raw duration and pattern text fields.
//!
//! Both functions are total: any input maps to a value, invalid input maps to
//! the "unset" value (0 for a duration, an empty sequence for a pattern).

/// Parses a duration field into milliseconds. Returns 0 when the text is not a
/// strictly positive integer.
pub fn normalize_duration(text: &str) -> u64 {
    match parse_int_prefix(text) {
        Some(value) if value > 0 => clamp_to_u64(value),
        _ => 0,
    }
}

/// Parses a pattern field into `[wait, vibrate, wait, vibrate, ...]` millisecond
/// segments. Tokens are separated by runs of commas and spaces; tokens that
/// do not parse or are negative are dropped, the rest keep their order.
pub fn normalize_pattern(text: &str) -> Vec<u64> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(is_pattern_separator)
        .filter_map(parse_int_prefix)
        .filter(|value| *value >= 0)
        .map(clamp_to_u64)
        .collect()
}

fn is_pattern_separator(ch: char) -> bool {
    ch == ',' || ch == ' '
}

/// Lenient base-10 parse: skips leading whitespace, accepts one sign, reads the
/// longest digit run and ignores whatever follows it. Digit runs past `u64`
/// saturate.
fn parse_int_prefix(token: &str) -> Option<i128> {
    let trimmed = token.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut magnitude: u64 = 0;
    let mut seen_digit = false;
    for byte in digits.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        seen_digit = true;
        magnitude = magnitude
            .saturating_mul(10)
            .saturating_add(u64::from(byte - b'0'));
    }
    if !seen_digit {
        return None;
    }

    let value = i128::from(magnitude);
    Some(if negative { -value } else { value })
}

fn clamp_to_u64(value: i128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
