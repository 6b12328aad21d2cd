//! Cookie string helpers.
//!
//! The login flow receives session tokens as `Set-Cookie` response headers
//! and sends them back as a single `Cookie` request header. These helpers
//! convert between the two shapes.

/// Extract a specific cookie value from a `Cookie`-style string.
///
/// # Example
/// ```
/// use bili_passport::cookie_utils::extract_cookie_value;
///
/// let cookies = "SESSDATA=abc123; bili_jct=xyz789";
/// assert_eq!(extract_cookie_value(cookies, "SESSDATA"), Some("abc123".to_string()));
/// ```
pub fn extract_cookie_value(cookies: &str, name: &str) -> Option<String> {
    for cookie in cookies.split(';') {
        let parts: Vec<&str> = cookie.trim().splitn(2, '=').collect();
        if parts.len() == 2 && parts[0] == name {
            return Some(parts[1].to_string());
        }
    }
    None
}

/// Parse one `Set-Cookie` header value into its `(name, value)` pair.
///
/// Attributes after the first `;` (Path, Expires, HttpOnly, ...) are
/// discarded. Returns `None` for headers without a `name=value` prefix.
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let kv = header.split(';').next()?;
    let parts: Vec<&str> = kv.trim().splitn(2, '=').collect();
    if parts.len() == 2 && !parts[0].is_empty() {
        Some((parts[0].to_string(), parts[1].to_string()))
    } else {
        None
    }
}
