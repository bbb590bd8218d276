//! Cached user profile and preference state.
//!
//! Holds the last profile fetched from the server so the CLI can show who is
//! signed in without a round trip. Cleared together with the credentials on
//! every logout.

use crate::error::{SessionError, SessionResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

const PROFILE_FILE: &str = "profile.json";

/// Snapshot of the signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProfile {
    /// Opaque profile payload as returned by `GET /users/me`
    pub profile: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

impl CachedProfile {
    pub fn new(profile: serde_json::Value) -> Self {
        Self {
            profile,
            cached_at: Utc::now(),
        }
    }

    /// Best-effort display name pulled from common profile fields.
    pub fn display_name(&self) -> Option<&str> {
        ["nickname", "name", "email"]
            .iter()
            .find_map(|field| self.profile.get(field).and_then(|v| v.as_str()))
    }
}

pub trait ProfileCache: Send + Sync {
    fn load(&self) -> Option<CachedProfile>;

    fn store(&self, profile: &CachedProfile) -> SessionResult<()>;

    /// Remove any cached state. Clearing an empty cache succeeds.
    fn clear(&self) -> SessionResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryProfileCache {
    profile: RwLock<Option<CachedProfile>>,
}

impl MemoryProfileCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileCache for MemoryProfileCache {
    fn load(&self) -> Option<CachedProfile> {
        self.profile
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store(&self, profile: &CachedProfile) -> SessionResult<()> {
        *self
            .profile
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(profile.clone());
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        *self
            .profile
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Profile cache persisted as JSON in the local data directory.
#[derive(Debug, Clone)]
pub struct FileProfileCache {
    path: PathBuf,
}

impl FileProfileCache {
    /// Cache at the default location (`<data dir>/studiobook/profile.json`)
    pub fn open() -> SessionResult<Self> {
        let path = get_profile_path().map_err(SessionError::storage)?;
        Ok(Self { path })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<Option<CachedProfile>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).context("Failed to read profile cache")?;
        let profile = serde_json::from_str(&content).context("Failed to parse profile cache")?;
        Ok(Some(profile))
    }

    fn write(&self, profile: &CachedProfile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create app data directory")?;
        }
        let content =
            serde_json::to_string_pretty(profile).context("Failed to serialize profile")?;
        std::fs::write(&self.path, content).context("Failed to write profile cache")?;
        Ok(())
    }
}

impl ProfileCache for FileProfileCache {
    fn load(&self) -> Option<CachedProfile> {
        match self.read() {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Ignoring unreadable profile cache: {:#}", e);
                None
            }
        }
    }

    fn store(&self, profile: &CachedProfile) -> SessionResult<()> {
        self.write(profile).map_err(SessionError::storage)?;
        tracing::debug!("Profile cached at {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .context("Failed to delete profile cache")
                .map_err(SessionError::storage)?;
            tracing::info!("Cleared cached profile");
        }
        Ok(())
    }
}

fn get_profile_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .context("Could not find data directory")?;
    Ok(data_dir.join("studiobook").join(PROFILE_FILE))
}
