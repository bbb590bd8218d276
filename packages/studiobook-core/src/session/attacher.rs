use crate::auth::CredentialStore;
use reqwest::{Request, Url};
use std::sync::Arc;

/// URL fragments of endpoints that must never carry a credential:
/// login, signup, email verification and terms consent.
pub const PUBLIC_ENDPOINTS: &[&str] = &["auth/login", "auth/signup", "auth/email", "auth/terms"];

/// Immutable allowlist of unauthenticated endpoints, matched by substring.
#[derive(Debug, Clone, Copy)]
pub struct PublicEndpoints {
    patterns: &'static [&'static str],
}

impl PublicEndpoints {
    pub const fn new(patterns: &'static [&'static str]) -> Self {
        Self { patterns }
    }

    pub fn matches(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.patterns.iter().any(|pattern| url.contains(pattern))
    }
}

impl Default for PublicEndpoints {
    fn default() -> Self {
        Self::new(PUBLIC_ENDPOINTS)
    }
}

/// Adds `Authorization: Bearer <access token>` to outbound requests.
#[derive(Clone)]
pub struct AuthAttacher {
    store: Arc<dyn CredentialStore>,
    public: PublicEndpoints,
}

impl AuthAttacher {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_public_endpoints(store, PublicEndpoints::default())
    }

    pub fn with_public_endpoints(store: Arc<dyn CredentialStore>, public: PublicEndpoints) -> Self {
        Self { store, public }
    }

    pub fn is_public(&self, url: &Url) -> bool {
        self.public.matches(url)
    }

    /// Attach the stored access token unless `request` targets a public
    /// endpoint or no token is stored. Any existing `Authorization` header is
    /// overwritten.
    pub fn attach(&self, mut request: Request) -> Request {
        if self.is_public(request.url()) {
            tracing::trace!(url = %request.url(), "Public endpoint, sending without credential");
            return request;
        }

        match self.store.access_token() {
            Some(token) => {
                super::set_bearer(&mut request, &token);
            }
            None => {
                tracing::debug!(url = %request.url(), "No access token stored, sending unauthenticated");
            }
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialKey, MemoryCredentialStore};
    use crate::session::bearer_token;
    use reqwest::header::{HeaderValue, AUTHORIZATION};
    use reqwest::Method;

    fn store_with_token(token: Option<&str>) -> Arc<dyn CredentialStore> {
        let store = MemoryCredentialStore::new();
        if let Some(token) = token {
            store.set(CredentialKey::AccessToken, token).unwrap();
        }
        Arc::new(store)
    }

    fn get(url: &str) -> Request {
        Request::new(Method::GET, url.parse().unwrap())
    }

    #[test]
    fn public_endpoints_never_get_a_credential() {
        let attacher = AuthAttacher::new(store_with_token(Some("T1")));
        for url in [
            "https://api.test/api/v1/auth/login",
            "https://api.test/api/v1/auth/signup",
            "https://api.test/api/v1/auth/email/verify",
            "https://api.test/api/v1/auth/terms?type=marketing",
        ] {
            let req = attacher.attach(get(url));
            assert!(req.headers().get(AUTHORIZATION).is_none(), "{url}");
        }
    }

    #[test]
    fn private_endpoint_gets_exactly_one_bearer_header() {
        let attacher = AuthAttacher::new(store_with_token(Some("T1")));
        let mut req = get("https://api.test/api/v1/users/me");
        req.headers_mut()
            .append(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        req.headers_mut()
            .append(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));

        let req = attacher.attach(req);
        assert_eq!(req.headers().get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(bearer_token(&req), Some("T1"));
    }

    #[test]
    fn missing_or_empty_token_passes_through() {
        for token in [None, Some("")] {
            let attacher = AuthAttacher::new(store_with_token(token));
            let req = attacher.attach(get("https://api.test/api/v1/reservations"));
            assert!(req.headers().get(AUTHORIZATION).is_none());
        }
    }

    #[test]
    fn refresh_endpoint_is_not_on_the_allowlist() {
        let url: Url = "https://api.test/api/v1/auth/reissue".parse().unwrap();
        assert!(!PublicEndpoints::default().matches(&url));
    }
}
