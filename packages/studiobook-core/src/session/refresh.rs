//! Credential refresh after a 401.
//!
//! The coordinator is the only component that renews credentials. All
//! decisions past the two cheap guards run under one async lock, and the
//! network refresh is awaited while that lock is held, so at most one refresh
//! call is in flight across the process. Requests that fail while a refresh is
//! running wait for the lock and are then re-signed from the stored result.

use super::{bearer_token, resign, retry_count, SessionTeardown, REFRESH_PATH};
use crate::auth::{CredentialKey, CredentialStore, SessionCredentials};
use crate::error::SessionResult;
use async_trait::async_trait;
use reqwest::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// A request is re-signed at most this many times before the session is
/// torn down.
pub const MAX_REFRESH_RETRIES: u32 = 2;

/// Body of the refresh call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub device_id: String,
    pub refresh_token: String,
}

/// Performs the network refresh call.
///
/// `Ok(None)` means the server reported success but sent no credentials.
/// Errors cover transport failures, undecodable bodies and unsuccessful
/// envelopes alike.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<Option<SessionCredentials>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    InFlight,
    Completed(RefreshOutcome),
}

/// Scoped in-flight marker. Dropping it always leaves `InFlight`, including
/// when the refresh future is cancelled mid-call.
struct InFlight<'a> {
    phase: &'a watch::Sender<RefreshPhase>,
    outcome: RefreshOutcome,
}

impl<'a> InFlight<'a> {
    fn begin(phase: &'a watch::Sender<RefreshPhase>) -> Self {
        phase.send_replace(RefreshPhase::InFlight);
        Self {
            phase,
            outcome: RefreshOutcome::Failed,
        }
    }

    fn succeeded(&mut self) {
        self.outcome = RefreshOutcome::Succeeded;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.phase
            .send_replace(RefreshPhase::Completed(self.outcome));
    }
}

pub struct RefreshCoordinator {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    teardown: SessionTeardown,
    gate: Mutex<()>,
    phase: watch::Sender<RefreshPhase>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        teardown: SessionTeardown,
    ) -> Self {
        let (phase, _) = watch::channel(RefreshPhase::Idle);
        Self {
            store,
            refresher,
            teardown,
            gate: Mutex::new(()),
            phase,
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<RefreshPhase> {
        self.phase.subscribe()
    }

    pub fn teardown(&self) -> &SessionTeardown {
        &self.teardown
    }

    /// Decide what to do with a request the server answered with 401.
    ///
    /// Returns the re-signed request to send again, or `None` when the
    /// request cannot be retried (the caller then sees the original 401).
    pub async fn authenticate(&self, failed: &Request) -> Option<Request> {
        if failed.url().as_str().contains(REFRESH_PATH) {
            tracing::debug!("Refresh endpoint rejected, not retrying");
            return None;
        }

        let attempts = retry_count(failed);
        if attempts >= MAX_REFRESH_RETRIES {
            tracing::warn!(
                url = %failed.url(),
                attempts,
                "Request still rejected after refreshed credentials"
            );
            self.teardown.force_logout();
            return None;
        }

        let _gate = self.gate.lock().await;

        let presented = bearer_token(failed);
        let current = self.store.access_token();
        if current.as_deref() != presented {
            // The store changed after this request was signed: either another
            // request already refreshed, or the session was torn down.
            return match current {
                Some(token) => {
                    tracing::debug!(url = %failed.url(), "Re-signing with already refreshed token");
                    resign(failed, &token, attempts + 1)
                }
                None => {
                    tracing::debug!(url = %failed.url(), "Session ended while request was in flight");
                    None
                }
            };
        }

        let mut in_flight = InFlight::begin(&self.phase);

        let non_empty = |key| self.store.get(key).filter(|v: &String| !v.is_empty());
        let (Some(refresh_token), Some(device_id)) = (
            non_empty(CredentialKey::RefreshToken),
            non_empty(CredentialKey::DeviceId),
        ) else {
            tracing::warn!("No refresh token or device id stored, cannot refresh");
            self.teardown.force_logout();
            return None;
        };

        let request = RefreshRequest {
            device_id,
            refresh_token,
        };
        match self.refresher.refresh(&request).await {
            Ok(Some(creds)) => {
                // Teardown does not wait for the gate; a session ended during
                // the call stays ended.
                match self.store.renew_session(&request.refresh_token, &request.device_id, &creds) {
                    Ok(false) => {
                        tracing::info!("Session ended during refresh, discarding new credentials");
                        return None;
                    }
                    Ok(true) => {}
                    Err(e) => {
                        tracing::warn!("Refreshed credentials could not be persisted: {}", e);
                    }
                }
                in_flight.succeeded();
                tracing::info!("Access token refreshed");
                resign(failed, &creds.access_token, attempts + 1)
            }
            Ok(None) => {
                tracing::warn!("Refresh succeeded without returning credentials");
                self.teardown.force_logout();
                None
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                self.teardown.force_logout();
                None
            }
        }
    }
}
