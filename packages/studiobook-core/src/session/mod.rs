//! Authenticated HTTP session layer.
//!
//! Every outbound request flows through [`SessionTransport`]:
//! - [`AuthAttacher`] adds the bearer credential unless the endpoint is public
//! - a 401 hands the request to [`RefreshCoordinator`], which either re-signs
//!   it (after at most one network refresh per expiry) or gives up
//! - giving up always goes through [`SessionTeardown`], which clears local
//!   state and broadcasts [`SessionEvent::Unauthorized`]

mod attacher;
mod refresh;
mod teardown;
mod transport;

pub use attacher::{AuthAttacher, PublicEndpoints, PUBLIC_ENDPOINTS};
pub use refresh::{
    RefreshCoordinator, RefreshOutcome, RefreshPhase, RefreshRequest, TokenRefresher,
    MAX_REFRESH_RETRIES,
};
pub use teardown::{SessionEvent, SessionTeardown};
pub use transport::SessionTransport;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;

/// Path fragment of the token refresh endpoint
pub const REFRESH_PATH: &str = "auth/reissue";

/// Internal bookkeeping header: how many times a request has been re-signed
/// by the refresh coordinator.
pub const RETRY_COUNT_HEADER: &str = "x-refresh-retry";

/// Retry count carried by `request`, 0 when absent or unparseable.
pub fn retry_count(request: &Request) -> u32 {
    request
        .headers()
        .get(RETRY_COUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Token presented in the request's `Authorization: Bearer` header.
pub fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Overwrite the bearer header. Returns false if the token is not a valid
/// header value, leaving the request untouched.
pub(crate) fn set_bearer(request: &mut Request, token: &str) -> bool {
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
            true
        }
        Err(e) => {
            tracing::warn!("Access token is not a valid header value: {}", e);
            false
        }
    }
}

/// Copy of `request` carrying `token` and the given retry count. `None` when
/// the body cannot be replayed.
pub(crate) fn resign(request: &Request, token: &str, count: u32) -> Option<Request> {
    let mut next = request.try_clone()?;
    if !set_bearer(&mut next, token) {
        return None;
    }
    next.headers_mut()
        .insert(RETRY_COUNT_HEADER, HeaderValue::from(count));
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, url.parse().unwrap())
    }

    #[test]
    fn retry_count_defaults_to_zero() {
        let mut req = request("https://api.test/users/me");
        assert_eq!(retry_count(&req), 0);

        req.headers_mut()
            .insert(RETRY_COUNT_HEADER, HeaderValue::from_static("garbage"));
        assert_eq!(retry_count(&req), 0);
    }

    #[test]
    fn resign_replaces_bearer_and_sets_count() {
        let mut req = request("https://api.test/users/me");
        assert!(set_bearer(&mut req, "old"));

        let next = resign(&req, "new", 1).unwrap();
        assert_eq!(bearer_token(&next), Some("new"));
        assert_eq!(retry_count(&next), 1);
        assert_eq!(next.headers().get_all(AUTHORIZATION).iter().count(), 1);
        // original untouched
        assert_eq!(bearer_token(&req), Some("old"));
    }

    #[test]
    fn invalid_token_is_not_attached() {
        let mut req = request("https://api.test/users/me");
        assert!(!set_bearer(&mut req, "bad\ntoken"));
        assert!(bearer_token(&req).is_none());
    }
}
