//! Refresh token cookie parsing and formatting.

use axum::http::header;

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "jwt";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                let value = value.trim();
                // An emptied cookie is the same as no cookie.
                return (!value.is_empty()).then_some(value);
            }
        }
    }
    None
}

fn cookie_attributes(secure: bool) -> &'static str {
    if secure {
        "SameSite=None; Secure"
    } else {
        "SameSite=Lax"
    }
}

/// `Set-Cookie` value carrying a refresh token.
pub fn refresh_cookie(token: &str, max_age: u64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; {}",
        REFRESH_COOKIE_NAME,
        token,
        max_age,
        cookie_attributes(secure)
    )
}

/// `Set-Cookie` value that removes the refresh token cookie.
pub fn clear_refresh_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; Path=/; Max-Age=0; {}",
        REFRESH_COOKIE_NAME,
        cookie_attributes(secure)
    )
}
