//! URL normalization for `navigate`.

/// Prefix `https://` when `raw` carries no scheme.
///
/// `about:` pages are left alone so `about:blank` keeps working.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") || trimmed.starts_with("about:") {
        return trimmed.to_string();
    }
    format!("https://{trimmed}")
}
