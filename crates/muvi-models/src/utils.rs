//! Small shared helpers.

/// Sanitize a string for use as a filename.
///
/// Keeps alphanumerics, spaces, dashes and underscores, collapses
/// whitespace to underscores and caps the length.
pub fn sanitize_filename(name: &str, max_length: usize) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_' || *c == '.')
        .collect();

    let mut out = String::with_capacity(safe.len());
    let mut last_was_sep = true;
    for c in safe.trim().chars() {
        if c.is_whitespace() {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else {
            out.push(c);
            last_was_sep = false;
        }
    }

    let trimmed: String = out.trim_matches('_').chars().take(max_length).collect();
    let trimmed = trimmed.trim_end_matches('_').to_string();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed
    }
}

/// Round a floating-point seconds value to millisecond precision.
///
/// Timeline arithmetic accumulates float noise; storing more precision
/// than a millisecond just makes diffs noisy.
pub fn round_secs(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}
