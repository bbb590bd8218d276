use super::{retry_count, AuthAttacher, RefreshCoordinator};
use crate::error::SessionResult;
use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response, StatusCode};
use std::sync::Arc;

/// HTTP transport that signs requests and transparently recovers from
/// expired access tokens.
#[derive(Clone)]
pub struct SessionTransport {
    client: Client,
    attacher: AuthAttacher,
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionTransport {
    pub fn new(client: Client, attacher: AuthAttacher, coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            client,
            attacher,
            coordinator,
        }
    }

    /// Start a request on the underlying client.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub async fn send(&self, builder: RequestBuilder) -> SessionResult<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Send `request`, re-sending it with refreshed credentials after a 401
    /// when the refresh coordinator allows. Whatever response ends the
    /// exchange is returned, including the final 401.
    pub async fn execute(&self, request: Request) -> SessionResult<Response> {
        let mut request = self.attacher.attach(request);

        loop {
            let eligible = !self.attacher.is_public(request.url());
            let retained = if eligible { request.try_clone() } else { None };
            let method = request.method().clone();
            let url = request.url().clone();
            let attempt = retry_count(&request);

            let response = self.client.execute(request).await?;
            let status = response.status();
            tracing::debug!(%method, %url, %status, attempt, "received HTTP response");

            if status != StatusCode::UNAUTHORIZED || !eligible {
                return Ok(response);
            }

            let Some(failed) = retained else {
                tracing::debug!(%url, "Request body cannot be replayed, not refreshing");
                return Ok(response);
            };

            match self.coordinator.authenticate(&failed).await {
                Some(next) => request = next,
                None => return Ok(response),
            }
        }
    }
}
