use axum::http::{header, HeaderMap, HeaderValue};
use fastnow_core::AuthError;

/// Extract the bearer token from the `Authorization` header. Tokens are only
/// ever taken from the transport, never from the request envelope.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth_str = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth_str.trim().split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn quote(value: &str) -> String {
    value.replace(['"', '\\'], "'")
}

/// `WWW-Authenticate` challenge value for a rejected request
pub fn www_authenticate(realm: &str, err: &AuthError) -> String {
    let mut challenge = format!(
        "Bearer realm=\"{}\", error=\"{}\", error_description=\"{}\"",
        quote(realm),
        err.challenge_code(),
        quote(&err.to_string())
    );

    if let AuthError::InsufficientScope { missing } = err {
        challenge.push_str(&format!(", scope=\"{}\"", missing.join(" ")));
    }

    challenge
}

/// Headers sent with every 401: the challenge plus a pointer to discovery
pub fn challenge_headers(public_url: &str, err: &AuthError) -> HeaderMap {
    let mut headers = HeaderMap::new();

    match HeaderValue::from_str(&www_authenticate(public_url, err)) {
        Ok(value) => {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }
        Err(_) => {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }
    }

    if let Ok(value) = HeaderValue::from_str(&format!(
        "<{}/.well-known/mcp.json>; rel=\"oauth-authorization-server\"",
        public_url
    )) {
        headers.insert(header::LINK, value);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token123"));
        assert_eq!(extract_bearer_token(&headers), Some("token123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  token123 "));
        assert_eq!(extract_bearer_token(&headers), Some("token123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn test_invalid_token_challenge() {
        let challenge = www_authenticate("https://mcp.fastnow.app", &AuthError::Expired);

        assert_eq!(
            challenge,
            "Bearer realm=\"https://mcp.fastnow.app\", error=\"invalid_token\", error_description=\"Access token expired\""
        );
    }

    #[test]
    fn test_insufficient_scope_challenge() {
        let err = AuthError::InsufficientScope {
            missing: vec!["read:food".to_string(), "write:food".to_string()],
        };
        let challenge = www_authenticate("https://mcp.fastnow.app", &err);

        assert!(challenge.contains("error=\"insufficient_scope\""));
        assert!(challenge.ends_with(", scope=\"read:food write:food\""));
    }

    #[test]
    fn test_challenge_headers() {
        let headers = challenge_headers("https://mcp.fastnow.app", &AuthError::MissingToken);

        assert!(headers
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("Bearer realm="));
        assert_eq!(
            headers.get(header::LINK).unwrap(),
            "<https://mcp.fastnow.app/.well-known/mcp.json>; rel=\"oauth-authorization-server\""
        );
    }
}
