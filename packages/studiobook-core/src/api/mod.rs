//! Client for the studio booking and community API.
//!
//! Domain payloads (studios, reservations, posts, profiles) are passed through
//! as opaque JSON; only the session credential shapes are typed.

mod client;
pub mod config;

pub use client::{ApiClient, ApiEnvelope, HttpTokenRefresher, LoginRequest, SignupRequest};
pub use config::{load_api_config, ApiConfig, ConfigSource};
