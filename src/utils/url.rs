//! Helpers for joining the configured backend root with endpoint paths.

/// Strip trailing slashes so endpoint paths can be appended safely.
///
/// ```
/// use troupe::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/"), "http://localhost:8000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a backend root and an endpoint path with exactly one slash.
///
/// ```
/// use troupe::utils::url::endpoint_url;
///
/// assert_eq!(
///     endpoint_url("http://localhost:8000/", "/api/chat/normal/stream"),
///     "http://localhost:8000/api/chat/normal/stream"
/// );
/// ```
pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        normalize_base_url(base_url),
        endpoint.trim_start_matches('/')
    )
}

/// True when `base_url` uses an http(s) scheme and names a host.
pub fn is_http_url(base_url: &str) -> bool {
    let base_url = base_url.trim();
    let rest = base_url
        .strip_prefix("http://")
        .or_else(|| base_url.strip_prefix("https://"));
    matches!(rest, Some(host) if !host.trim_start_matches('/').is_empty())
}
