use axum::{
    extract::{Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{IdentityCodec, COOKIE_NAME};

/// User id resolved for the current request, available as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Resolve the caller's identity from the `user` cookie and issue a new
/// cookie when none (or an invalid one) was presented.
pub async fn identify_user(
    State(codec): State<Arc<IdentityCodec>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = cookie_value(request.headers(), COOKIE_NAME);

    let identity = match codec.resolve(token.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(error = %e, "failed to issue user identity");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    request
        .extensions_mut()
        .insert(UserId(identity.user_id.clone()));
    let mut response = next.run(request).await;

    if let Some(token) = identity.issued_token {
        match HeaderValue::from_str(&format!("{COOKIE_NAME}={token}; Path=/; HttpOnly")) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(e) => tracing::error!(error = %e, "failed to encode user cookie"),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; user=abc123"));
        headers.append(COOKIE, HeaderValue::from_static("other=1"));

        assert_eq!(cookie_value(&headers, "user").as_deref(), Some("abc123"));
        assert_eq!(cookie_value(&headers, "other").as_deref(), Some("1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
