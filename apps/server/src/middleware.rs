//! Authentication and throttling middleware

use std::net::SocketAddr;

use auth::{Caller, digest_token, extract_token};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{
    error::{ServerError, ServerResult},
    state::AppState,
};

/// Client key used when no address is known.
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Authentication middleware
///
/// Resolves the token in the `Authorization` header to an active user and
/// inserts the matching [`Caller`] into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ServerResult<Response> {
    let key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_token)
        .ok_or_else(|| {
            debug!("No authentication token provided");
            ServerError::AuthenticationFailed(
                "Authentication credentials were not provided.".into(),
            )
        })?;

    let caller = authenticate(&state, key).await?;
    debug!(user_id = %caller.user_id, "Authenticated user");

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

async fn authenticate(state: &AppState, key: &str) -> ServerResult<Caller> {
    let invalid = || ServerError::AuthenticationFailed("Invalid token.".into());

    let token = state
        .store
        .get_token_by_digest(&digest_token(key))
        .await?
        .ok_or_else(invalid)?;

    let user = state.store.get_user(token.user_id).await?.ok_or_else(invalid)?;
    if !user.is_active {
        debug!(user_id = %user.id, "Token belongs to inactive user");
        return Err(ServerError::AuthenticationFailed(
            "User inactive or deleted.".into(),
        ));
    }

    Ok(Caller::from_user(&user))
}

/// Registration throttle middleware
pub async fn throttle_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ServerResult<Response> {
    let client = client_key(&request, state.config.num_proxies);

    if let Err(retry_after_secs) = state.throttle.check(&client).await {
        tracing::warn!(client = %client, "Registration rate limit exceeded");
        return Err(ServerError::RateLimited { retry_after_secs });
    }

    Ok(next.run(request).await)
}

/// Identifies the client for throttling.
///
/// `X-Forwarded-For` is only consulted behind `num_proxies` trusted proxies,
/// taking the hop that many entries from the right. Otherwise the socket
/// address is used.
fn client_key(request: &Request, num_proxies: usize) -> String {
    let forwarded = (num_proxies > 0)
        .then(|| forwarded_for(request.headers(), num_proxies))
        .flatten();

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}

fn forwarded_for(headers: &HeaderMap, num_proxies: usize) -> Option<String> {
    let hops: Vec<&str> = headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .collect();

    let index = hops.len().saturating_sub(num_proxies);
    hops.get(index)
        .filter(|hop| !hop.is_empty())
        .map(|hop| hop.to_string())
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::HeaderValue};

    use super::*;

    fn request_from(peer: [u8; 4], forwarded: Option<&'static str>) -> Request {
        let mut request = Request::new(Body::empty());
        if let Some(value) = forwarded {
            request
                .headers_mut()
                .insert("x-forwarded-for", HeaderValue::from_static(value));
        }
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        request
    }

    #[test]
    fn test_client_key_ignores_forwarded_for_without_proxies() {
        let request = request_from([192, 0, 2, 1], Some("203.0.113.7"));
        assert_eq!(client_key(&request, 0), "192.0.2.1");
    }

    #[test]
    fn test_client_key_behind_proxies() {
        // Client, then the first proxy as seen by the second.
        let request = request_from([10, 0, 0, 2], Some("198.51.100.9, 203.0.113.7, 10.0.0.1"));

        assert_eq!(client_key(&request, 1), "10.0.0.1");
        assert_eq!(client_key(&request, 2), "203.0.113.7");
        // More proxies than hops falls back to the leftmost hop.
        assert_eq!(client_key(&request, 5), "198.51.100.9");

        let request = request_from([10, 0, 0, 2], None);
        assert_eq!(client_key(&request, 1), "10.0.0.2");

        let request = request_from([10, 0, 0, 2], Some(" , "));
        assert_eq!(client_key(&request, 1), "10.0.0.2");
    }

    #[test]
    fn test_client_key_falls_back() {
        let request = Request::new(Body::empty());
        assert_eq!(client_key(&request, 0), ANONYMOUS_CLIENT);
        assert_eq!(client_key(&request, 1), ANONYMOUS_CLIENT);
    }
}
