use super::config::{load_api_config, ApiConfig};
use crate::auth::{
    CachedProfile, CredentialStore, FileProfileCache, ProfileCache, SecureCredentialStore,
    SessionCredentials,
};
use crate::error::{SessionError, SessionResult};
use crate::session::{
    AuthAttacher, RefreshCoordinator, RefreshRequest, SessionEvent, SessionTeardown,
    SessionTransport, TokenRefresher, REFRESH_PATH,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Response envelope used by every endpoint of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub is_success: bool,
    pub code: Option<String>,
    pub message: Option<String>,
    pub result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// The result payload if the envelope reports success.
    pub fn into_result(self, status: u16) -> SessionResult<Option<T>> {
        if self.is_success {
            Ok(self.result)
        } else {
            Err(SessionError::Api {
                status,
                message: self
                    .message
                    .or(self.code)
                    .unwrap_or_else(|| "request was not successful".to_string()),
            })
        }
    }
}

/// Refresh call against `POST {api_url}/auth/reissue`.
///
/// Uses a plain client: the refresh request is never signed by the attacher
/// nor routed back through the coordinator.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(http: reqwest::Client, api_url: &str) -> Self {
        Self {
            http,
            url: format!("{}/{}", api_url, REFRESH_PATH),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<Option<SessionCredentials>> {
        let resp = self.http.post(&self.url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: ApiEnvelope<SessionCredentials> = resp
            .json()
            .await
            .map_err(|e| SessionError::Decode(e.to_string()))?;
        envelope.into_result(status.as_u16())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub nickname: String,
    /// Identifiers of the terms the user agreed to
    pub agreed_terms: Vec<u64>,
}

/// Client for the studio booking and community API.
///
/// All calls go through a [`SessionTransport`], so authenticated endpoints
/// recover from an expired access token without the caller noticing. When
/// recovery is impossible the session is torn down and subscribers receive
/// [`SessionEvent::Unauthorized`].
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: SessionTransport,
    store: Arc<dyn CredentialStore>,
    profile: Arc<dyn ProfileCache>,
    teardown: SessionTeardown,
}

impl ApiClient {
    pub fn new(
        config: &ApiConfig,
        store: Arc<dyn CredentialStore>,
        profile: Arc<dyn ProfileCache>,
    ) -> SessionResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        let teardown = SessionTeardown::new(store.clone(), profile.clone());
        let refresher = Arc::new(HttpTokenRefresher::new(http.clone(), &config.api_url));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            refresher,
            teardown.clone(),
        ));
        let transport = SessionTransport::new(http, AuthAttacher::new(store.clone()), coordinator);

        Ok(Self {
            base_url: config.api_url.clone(),
            transport,
            store,
            profile,
            teardown,
        })
    }

    /// Client using the configured endpoint and on-disk storage.
    pub fn from_default_storage() -> SessionResult<Self> {
        let config = load_api_config();
        let store: Arc<dyn CredentialStore> = Arc::new(SecureCredentialStore::open()?);
        let profile: Arc<dyn ProfileCache> = Arc::new(FileProfileCache::open()?);
        Self::new(&config, store, profile)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Session events (forced logout, explicit sign-out).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.teardown.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.session().is_some()
    }

    pub fn cached_profile(&self) -> Option<CachedProfile> {
        self.profile.load()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.transport.request(method, url)
    }

    // ------------------------------------------------------------------
    // Public endpoints
    // ------------------------------------------------------------------

    pub async fn login(&self, email: &str, password: &str) -> SessionResult<SessionCredentials> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let creds = self.start_session("auth/login", &body).await?;
        tracing::info!("Logged in as {}", email);
        Ok(creds)
    }

    pub async fn signup(&self, request: &SignupRequest) -> SessionResult<SessionCredentials> {
        let creds = self.start_session("auth/signup", request).await?;
        tracing::info!("Signed up as {}", request.email);
        Ok(creds)
    }

    async fn start_session<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> SessionResult<SessionCredentials> {
        let resp = self
            .transport
            .send(self.request(Method::POST, path).json(body))
            .await?;
        let creds: SessionCredentials = require(decode(resp).await?)?;

        // A new login replaces whatever profile belonged to the last session
        if let Err(e) = self.profile.clear() {
            tracing::warn!("Failed to clear stale profile cache: {}", e);
        }
        self.store.set_session(&creds)?;
        Ok(creds)
    }

    pub async fn send_verification_email(&self, email: &str) -> SessionResult<()> {
        let resp = self
            .transport
            .send(
                self.request(Method::POST, "auth/email/send")
                    .json(&serde_json::json!({ "email": email })),
            )
            .await?;
        decode::<Value>(resp).await?;
        Ok(())
    }

    pub async fn verify_email(&self, email: &str, code: &str) -> SessionResult<()> {
        let resp = self
            .transport
            .send(
                self.request(Method::POST, "auth/email/verify")
                    .json(&serde_json::json!({ "email": email, "code": code })),
            )
            .await?;
        decode::<Value>(resp).await?;
        Ok(())
    }

    /// Terms the user must consent to during signup.
    pub async fn terms(&self) -> SessionResult<Value> {
        self.get_json("auth/terms", &[]).await
    }

    // ------------------------------------------------------------------
    // Authenticated endpoints
    // ------------------------------------------------------------------

    /// Log out on the server (best effort), then end the local session.
    pub async fn logout(&self) -> SessionResult<()> {
        let result = match self
            .transport
            .send(self.request(Method::POST, "auth/logout"))
            .await
        {
            Ok(resp) => decode::<Value>(resp).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!("Server logout failed, clearing local session anyway: {}", e);
        }
        self.teardown.sign_out();
        Ok(())
    }

    /// Fetch the signed-in user's profile and cache it.
    pub async fn profile(&self) -> SessionResult<Value> {
        let profile = self.get_json("users/me", &[]).await?;
        if let Err(e) = self.profile.store(&CachedProfile::new(profile.clone())) {
            tracing::warn!("Failed to cache profile: {}", e);
        }
        Ok(profile)
    }

    pub async fn search_studios(&self, keyword: Option<&str>) -> SessionResult<Value> {
        let query: Vec<(&str, String)> = keyword
            .map(|k| vec![("keyword", k.to_string())])
            .unwrap_or_default();
        self.get_json("studios", &query).await
    }

    pub async fn reservations(&self) -> SessionResult<Value> {
        self.get_json("reservations", &[]).await
    }

    pub async fn create_reservation(&self, reservation: &Value) -> SessionResult<Value> {
        self.post_json("reservations", reservation).await
    }

    pub async fn community_posts(&self, page: u32) -> SessionResult<Value> {
        self.get_json("community/posts", &[("page", page.to_string())])
            .await
    }

    pub async fn like_post(&self, post_id: u64) -> SessionResult<Value> {
        self.post_json(&format!("community/posts/{}/likes", post_id), &Value::Null)
            .await
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> SessionResult<Value> {
        let resp = self
            .transport
            .send(self.request(Method::GET, path).query(query))
            .await?;
        Ok(decode(resp).await?.unwrap_or(Value::Null))
    }

    async fn post_json(&self, path: &str, body: &Value) -> SessionResult<Value> {
        let mut builder = self.request(Method::POST, path);
        if !body.is_null() {
            builder = builder.json(body);
        }
        let resp = self.transport.send(builder).await?;
        Ok(decode(resp).await?.unwrap_or(Value::Null))
    }
}

/// Turn a response into its envelope result, mapping HTTP and envelope
/// failures to [`SessionError::Api`].
async fn decode<T: DeserializeOwned>(resp: Response) -> SessionResult<Option<T>> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiEnvelope<Value>>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(body);
        return Err(SessionError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiEnvelope<T> =
        serde_json::from_str(&body).map_err(|e| SessionError::Decode(e.to_string()))?;
    envelope.into_result(status.as_u16())
}

fn require<T>(result: Option<T>) -> SessionResult<T> {
    result.ok_or_else(|| SessionError::Decode("response carried no result".to_string()))
}
