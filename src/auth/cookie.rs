use axum::http::{HeaderMap, HeaderValue};

/// Session cookie carrying the signed token.
pub const SESSION_COOKIE: &str = "trailhead_session";

/// Sentinel written over the session on logout; expires after 10 seconds.
const LOGOUT_SENTINEL: &str = "logged_out";

pub fn parse_session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == SESSION_COOKIE {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

/// Secure is only set when TLS terminated here or upstream says it did.
pub fn wants_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

pub fn session_cookie(token: &str, secure: bool, ttl_days: i64) -> HeaderValue {
    let mut value = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token,
        ttl_days * 24 * 60 * 60
    );
    if secure {
        value.push_str("; Secure");
    }
    HeaderValue::from_str(&value).unwrap()
}

pub fn logout_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age=10",
        SESSION_COOKIE, LOGOUT_SENTINEL
    ))
    .unwrap()
}
