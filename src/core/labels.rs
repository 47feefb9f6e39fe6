/// Label value parsing
///
/// Container labels are free-form strings. These helpers turn them into the
/// two shapes the rest of the crate works with: booleans and pattern lists.

/// Spellings accepted as "enabled" in a label or environment value
pub const TRUE_VALUES: &[&str] = &["1", "true", "True", "TRUE", "yes", "Yes"];

/// Evaluate the truthfulness of a label value. Unset is false.
pub fn is_true(raw: Option<&str>) -> bool {
    raw.map(|value| TRUE_VALUES.contains(&value))
        .unwrap_or(false)
}

/// Parse a comma separated include/exclude pattern list.
///
/// `None` means "no filter": returned for a missing value and for a value
/// that holds nothing but whitespace and commas.
pub fn parse_pattern_list(raw: Option<&str>) -> Option<Vec<String>> {
    let patterns: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if patterns.is_empty() {
        None
    } else {
        Some(patterns)
    }
}
