//! Session token scraping from RAVA profile pages.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Matches the token whether it appears as an HTML attribute
    /// (`access_token="..."`), a Vue binding (`:access_token="'...'"`)
    /// or a JSON/JS member (`"access_token":"..."`).
    static ref ACCESS_TOKEN_REGEX: Regex =
        Regex::new(r#"access_token["']?\s*[:=]\s*["']+([^"'\s<>]+)"#)
            .expect("Invalid regex pattern");
}

/// First access token embedded in `html`, if any.
pub fn extract_token(html: &str) -> Option<String> {
    ACCESS_TOKEN_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
