use crate::auth::{CredentialStore, ProfileCache};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Process-wide session notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session could not be renewed; the user must log in again
    Unauthorized,
    /// The user logged out explicitly
    SignedOut,
}

impl SessionEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            SessionEvent::Unauthorized => "unauthorized",
            SessionEvent::SignedOut => "signed-out",
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ends the local session and tells the rest of the process about it.
///
/// Stores are cleared before the event is sent, so a subscriber that reacts
/// to the event always observes a fully cleared session.
#[derive(Clone)]
pub struct SessionTeardown {
    store: Arc<dyn CredentialStore>,
    profile: Arc<dyn ProfileCache>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTeardown {
    pub fn new(store: Arc<dyn CredentialStore>, profile: Arc<dyn ProfileCache>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            profile,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Clear everything and broadcast [`SessionEvent::Unauthorized`].
    pub fn force_logout(&self) {
        tracing::warn!("Session could not be renewed, forcing logout");
        self.end_session(SessionEvent::Unauthorized);
    }

    /// Clear everything and broadcast [`SessionEvent::SignedOut`].
    pub fn sign_out(&self) {
        tracing::info!("Signing out");
        self.end_session(SessionEvent::SignedOut);
    }

    fn end_session(&self, event: SessionEvent) {
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear credentials: {}", e);
        }
        if let Err(e) = self.profile.clear() {
            tracing::error!("Failed to clear cached profile: {}", e);
        }

        // No subscribers is fine
        let delivered = self.events.send(event).unwrap_or(0);
        tracing::debug!(event = %event, subscribers = delivered, "Session event sent");
    }
}
