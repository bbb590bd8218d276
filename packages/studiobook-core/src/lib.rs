//! Studiobook Core Library
//!
//! This crate provides the client side of the studiobook service:
//! - Authenticated HTTP session (credential attach, single-flight token
//!   refresh, forced logout broadcast)
//! - API client for auth, profile, studio search, reservations and the
//!   community feed
//! - Credential management (keyring with file fallback)
//!
//! # Features
//!
//! - `keyring-storage` (default): Use platform keyring for credential storage
//! - `file-storage`: Use file-based credential storage (for headless Linux)
//!
//! # Example
//!
//! ```no_run
//! use studiobook_core::{ApiClient, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ApiClient::from_default_storage()?;
//!
//!     // React to expired sessions
//!     let mut events = client.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if event == SessionEvent::Unauthorized {
//!                 eprintln!("Session expired. Please log in again.");
//!             }
//!         }
//!     });
//!
//!     client.login("user@example.com", "secret").await?;
//!     let reservations = client.reservations().await?;
//!     println!("{}", reservations);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod error;
pub mod session;

// Re-export commonly used types
pub use api::{ApiClient, ApiConfig, ConfigSource};
pub use auth::{CredentialStore, SessionCredentials};
pub use error::{SessionError, SessionResult};
pub use session::{RefreshCoordinator, SessionEvent, SessionTeardown, SessionTransport};
