//! URL helpers for talking to the local inference server.

/// Normalize a base URL by removing trailing slashes
///
/// ```
/// use confab::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling slashes
///
/// ```
/// use confab::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://127.0.0.1:8080/", "/completion"),
///     "http://127.0.0.1:8080/completion"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Build the client-side base URL for a server bound to `host:port`.
///
/// Wildcard bind addresses are not connectable, so they map to loopback.
/// IPv6 literals are bracketed.
pub fn server_base_url(host: &str, port: u16) -> String {
    let host = match host.trim() {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    };
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}
