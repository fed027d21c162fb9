//! Input URL normalization.

use reqwest::Url;

use super::ServiceError;

/// Normalizes a post URL so the same post always maps to the same string.
///
/// Only `http`/`https` URLs with a host are accepted. Query string, fragment
/// and trailing slashes are dropped; the host is lowercased by the parser.
pub fn normalize_url(input: &str) -> Result<String, ServiceError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidUrl("URL is empty".to_string()));
    }

    let mut url = Url::parse(trimmed).map_err(|e| ServiceError::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ServiceError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ServiceError::InvalidUrl("URL has no host".to_string()));
    }

    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    Ok(url.as_str().trim_end_matches('/').to_string())
}
