//! Tolerant scalar parsing for upstream CSV cells.
//!
//! Every function here maps empty, placeholder or malformed input to `None`.
//! Malformed upstream data never aborts a batch; it only blanks the one field.

/// Placeholder tokens upstream feeds use for "not reported"
pub const PLACEHOLDER_TOKENS: &[&str] = &["NA", "N/A"];

fn clean(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

/// Parse a decimal measurement. Non-finite values are treated as absent.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Parse an integer measurement, truncating fractional text such as `"12.0"`
pub fn parse_integer(text: &str) -> Option<i32> {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.parse::<i32>() {
        return Some(value);
    }

    let value = parse_decimal(cleaned)?.trunc();
    if value < i32::MIN as f64 || value > i32::MAX as f64 {
        return None;
    }
    Some(value as i32)
}

/// Parse a free-text token: trimmed, unquoted, and absent when empty or one of
/// `excluded` (compared case-insensitively)
pub fn parse_token(text: &str, excluded: &[&str]) -> Option<String> {
    let cleaned = clean(text);
    if cleaned.is_empty()
        || excluded
            .iter()
            .any(|token| token.eq_ignore_ascii_case(cleaned))
    {
        return None;
    }
    Some(cleaned.to_string())
}
