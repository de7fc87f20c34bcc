/// Maximum length of a Kubernetes object name
pub const MAX_NAME_LEN: usize = 63;

/// Join `base` and `suffix` with a dash, truncating to fit a Kubernetes object name.
///
/// A short fragment (at most half of the available length) is preserved and the
/// other one is truncated; if both are long, each gets half. Dashes left dangling
/// at the end of a truncated fragment are dropped.
pub fn build_name(base: &str, suffix: &str) -> String {
    if base.len() + suffix.len() + 1 <= MAX_NAME_LEN {
        return format!("{}-{}", base, suffix);
    }

    let available = MAX_NAME_LEN - 1;
    let half = available / 2;
    let (base_len, suffix_len) = if suffix.len() <= half {
        (available - suffix.len(), suffix.len())
    } else if base.len() <= half {
        (base.len(), available - base.len())
    } else {
        (half, half)
    };

    format!(
        "{}-{}",
        truncate(base, base_len),
        truncate(suffix, suffix_len)
    )
}

fn truncate(fragment: &str, len: usize) -> &str {
    let cut = fragment
        .char_indices()
        .nth(len)
        .map(|(idx, _)| idx)
        .unwrap_or(fragment.len());
    fragment[..cut].trim_end_matches('-')
}
