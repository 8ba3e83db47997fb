/// Parse a numeric field the way station tables and time-series exports write them.
///
/// Accepts surrounding whitespace and a decimal comma. Blank, `None`/`null`/`NaN`
/// and unparseable values are `None`; they are never read as zero.
///
/// # Examples
/// ```
/// use tempmap::utils::parse_numeric;
///
/// assert_eq!(parse_numeric(" 49,75 "), Some(49.75));
/// assert_eq!(parse_numeric("None"), None);
/// ```
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "none" | "null" | "nan" | "na" => return None,
        _ => {}
    }

    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Normalize a station identifier; blank ids are absent.
pub fn normalize_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("15.4730"), Some(15.473));
        assert_eq!(parse_numeric("-3,5"), Some(-3.5));
        assert_eq!(parse_numeric("  0 "), Some(0.0));
    }

    #[test]
    fn test_unavailable_is_not_zero() {
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("   "), None);
        assert_eq!(parse_numeric("None"), None);
        assert_eq!(parse_numeric("NaN"), None);
        assert_eq!(parse_numeric("abc"), None);
        assert_eq!(parse_numeric("inf"), None);
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id(" 0-203-0-11406 "), Some("0-203-0-11406".to_string()));
        assert_eq!(normalize_id("  "), None);
    }
}
