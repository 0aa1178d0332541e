//! Free-form duration parsing for vote and registration windows.

/// Fallback returned for empty or unparseable input (one minute).
pub const DEFAULT_DURATION_MS: u64 = 60_000;

fn unit_ms(unit: char) -> Option<u64> {
    match unit {
        'd' => Some(86_400_000),
        'h' => Some(3_600_000),
        'm' => Some(60_000),
        's' => Some(1_000),
        _ => None,
    }
}

/// Parse a duration string made of `<integer><unit>` tokens into milliseconds.
///
/// Units are `d`, `h`, `m` and `s`, in any order and any subset. Characters
/// that are not part of a token are ignored. Input that yields no positive
/// total returns [`DEFAULT_DURATION_MS`]; this never fails and never returns
/// zero, so callers cannot use it to detect malformed input.
///
/// ```rust
/// use chamber_core::parse_duration_ms;
///
/// assert_eq!(parse_duration_ms("1h30m"), 5_400_000);
/// assert_eq!(parse_duration_ms(""), 60_000);
/// ```
pub fn parse_duration_ms(input: &str) -> u64 {
    let mut total: u64 = 0;
    let mut digits: Option<u64> = None;

    for c in input.chars().map(|c| c.to_ascii_lowercase()) {
        if let Some(d) = c.to_digit(10) {
            let value = digits.unwrap_or(0);
            digits = Some(value.saturating_mul(10).saturating_add(u64::from(d)));
            continue;
        }

        if let (Some(value), Some(ms)) = (digits, unit_ms(c)) {
            total = total.saturating_add(value.saturating_mul(ms));
        }
        digits = None;
    }

    if total == 0 {
        DEFAULT_DURATION_MS
    } else {
        total
    }
}
