//! Session credential storage with platform keyring and file-based fallback.
//!
//! Storage priority:
//! 1. Platform keyring (if `keyring-storage` feature enabled and available)
//! 2. File-based storage (owner read/write only on Unix)
//!
//! Every store keeps an in-memory snapshot behind a lock. Whole-session writes
//! and clears swap the snapshot in a single write so concurrent readers see
//! either the old session or the new one, never a mix of the two.

use crate::error::{SessionError, SessionResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Service name used for keyring storage
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "studiobook";
/// Username used for keyring entry
#[cfg(feature = "keyring-storage")]
const KEYRING_USER: &str = "session";

const CREDENTIALS_FILE: &str = ".credentials";

/// Individual values held by a [`CredentialStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
    DeviceId,
}

/// A complete authenticated session as issued by login, signup or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub device_id: String,
}

/// Persisted form. Any field may be missing, in which case the session is
/// treated as unauthenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
    device_id: Option<String>,
}

impl StoredCredentials {
    fn get(&self, key: CredentialKey) -> Option<&String> {
        match key {
            CredentialKey::AccessToken => self.access_token.as_ref(),
            CredentialKey::RefreshToken => self.refresh_token.as_ref(),
            CredentialKey::DeviceId => self.device_id.as_ref(),
        }
    }

    fn slot_mut(&mut self, key: CredentialKey) -> &mut Option<String> {
        match key {
            CredentialKey::AccessToken => &mut self.access_token,
            CredentialKey::RefreshToken => &mut self.refresh_token,
            CredentialKey::DeviceId => &mut self.device_id,
        }
    }

    fn holds(&self, refresh_token: &str, device_id: &str) -> bool {
        self.refresh_token.as_deref() == Some(refresh_token)
            && self.device_id.as_deref() == Some(device_id)
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.device_id.is_none()
    }
}

impl From<&SessionCredentials> for StoredCredentials {
    fn from(creds: &SessionCredentials) -> Self {
        Self {
            access_token: Some(creds.access_token.clone()),
            refresh_token: Some(creds.refresh_token.clone()),
            device_id: Some(creds.device_id.clone()),
        }
    }
}

/// Durable key-value store for the session credential triple.
///
/// All operations are synchronous from the caller's perspective. The auth
/// attacher only reads; the refresh coordinator, login flows and session
/// teardown write.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Option<String>;

    fn set(&self, key: CredentialKey, value: &str) -> SessionResult<()>;

    /// Replace all three values in one write.
    fn set_session(&self, creds: &SessionCredentials) -> SessionResult<()>;

    /// Replace the session only if it is still the one identified by
    /// `refresh_token` and `device_id`. Returns `false` and leaves the store
    /// untouched when it was cleared or replaced in the meantime.
    fn renew_session(
        &self,
        refresh_token: &str,
        device_id: &str,
        creds: &SessionCredentials,
    ) -> SessionResult<bool>;

    /// Remove every value. Clearing an empty store succeeds.
    fn clear(&self) -> SessionResult<()>;

    /// Current access token, ignoring empty values.
    fn access_token(&self) -> Option<String> {
        self.get(CredentialKey::AccessToken)
            .filter(|token| !token.is_empty())
    }

    /// The full session, or `None` if any of the three values is missing.
    fn session(&self) -> Option<SessionCredentials> {
        let non_empty = |key| self.get(key).filter(|v: &String| !v.is_empty());
        Some(SessionCredentials {
            access_token: non_empty(CredentialKey::AccessToken)?,
            refresh_token: non_empty(CredentialKey::RefreshToken)?,
            device_id: non_empty(CredentialKey::DeviceId)?,
        })
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store with no persistence.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    snapshot: RwLock<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(creds: &SessionCredentials) -> Self {
        Self {
            snapshot: RwLock::new(StoredCredentials::from(creds)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        read_lock(&self.snapshot).get(key).cloned()
    }

    fn set(&self, key: CredentialKey, value: &str) -> SessionResult<()> {
        *write_lock(&self.snapshot).slot_mut(key) = Some(value.to_string());
        Ok(())
    }

    fn set_session(&self, creds: &SessionCredentials) -> SessionResult<()> {
        *write_lock(&self.snapshot) = StoredCredentials::from(creds);
        Ok(())
    }

    fn renew_session(
        &self,
        refresh_token: &str,
        device_id: &str,
        creds: &SessionCredentials,
    ) -> SessionResult<bool> {
        let mut guard = write_lock(&self.snapshot);
        if !guard.holds(refresh_token, device_id) {
            return Ok(false);
        }
        *guard = StoredCredentials::from(creds);
        Ok(true)
    }

    fn clear(&self) -> SessionResult<()> {
        *write_lock(&self.snapshot) = StoredCredentials::default();
        Ok(())
    }
}

// ============================================================================
// Persistent store
// ============================================================================

#[derive(Debug, Clone)]
enum Backend {
    /// Platform keyring, mirrored to the file as a backup
    #[cfg(feature = "keyring-storage")]
    Keyring { file: PathBuf },
    File(PathBuf),
}

/// Store backed by the platform keyring (when enabled) and a credentials file.
#[derive(Debug)]
pub struct SecureCredentialStore {
    backend: Backend,
    snapshot: RwLock<StoredCredentials>,
}

impl SecureCredentialStore {
    /// Open the store at its default location, loading any saved session.
    pub fn open() -> SessionResult<Self> {
        let file = get_credentials_file_path().map_err(SessionError::storage)?;

        #[cfg(feature = "keyring-storage")]
        let backend = Backend::Keyring { file };

        #[cfg(not(feature = "keyring-storage"))]
        let backend = Backend::File(file);

        Self::from_backend(backend)
    }

    /// Open a file-only store at `path` (used by headless installs and tests).
    pub fn with_file(path: impl Into<PathBuf>) -> SessionResult<Self> {
        Self::from_backend(Backend::File(path.into()))
    }

    fn from_backend(backend: Backend) -> SessionResult<Self> {
        let loaded = load(&backend).map_err(SessionError::storage)?;
        if loaded.is_some() {
            tracing::debug!("Loaded saved session credentials");
        }
        Ok(Self {
            backend,
            snapshot: RwLock::new(loaded.unwrap_or_default()),
        })
    }

    /// Apply `change` to the snapshot and persist the result while still
    /// holding the write lock, so the on-disk order of writes matches the
    /// in-memory order. Nothing is written when `change` returns `false`.
    fn update(&self, change: impl FnOnce(&mut StoredCredentials) -> bool) -> SessionResult<bool> {
        let mut guard = write_lock(&self.snapshot);
        if !change(&mut guard) {
            return Ok(false);
        }
        let result = if guard.is_empty() {
            erase(&self.backend)
        } else {
            persist(&self.backend, &guard)
        };
        result.map_err(SessionError::storage)?;
        Ok(true)
    }

    fn replace(&self, next: StoredCredentials) -> SessionResult<()> {
        self.update(|snapshot| {
            *snapshot = next;
            true
        })
        .map(|_| ())
    }
}

impl CredentialStore for SecureCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        read_lock(&self.snapshot).get(key).cloned()
    }

    fn set(&self, key: CredentialKey, value: &str) -> SessionResult<()> {
        self.update(|snapshot| {
            *snapshot.slot_mut(key) = Some(value.to_string());
            true
        })
        .map(|_| ())
    }

    fn set_session(&self, creds: &SessionCredentials) -> SessionResult<()> {
        self.replace(StoredCredentials::from(creds))?;
        tracing::info!("Session credentials saved");
        Ok(())
    }

    fn renew_session(
        &self,
        refresh_token: &str,
        device_id: &str,
        creds: &SessionCredentials,
    ) -> SessionResult<bool> {
        let renewed = self.update(|snapshot| {
            if !snapshot.holds(refresh_token, device_id) {
                return false;
            }
            *snapshot = StoredCredentials::from(creds);
            true
        })?;
        if renewed {
            tracing::info!("Session credentials renewed");
        }
        Ok(renewed)
    }

    fn clear(&self) -> SessionResult<()> {
        self.replace(StoredCredentials::default())
    }
}

fn load(backend: &Backend) -> Result<Option<StoredCredentials>> {
    match backend {
        #[cfg(feature = "keyring-storage")]
        Backend::Keyring { file } => load_from_keyring(file),
        Backend::File(path) => load_from_file(path),
    }
}

fn persist(backend: &Backend, creds: &StoredCredentials) -> Result<()> {
    match backend {
        #[cfg(feature = "keyring-storage")]
        Backend::Keyring { file } => save_to_keyring(file, creds),
        Backend::File(path) => save_to_file(path, creds),
    }
}

fn erase(backend: &Backend) -> Result<()> {
    match backend {
        #[cfg(feature = "keyring-storage")]
        Backend::Keyring { file } => delete_from_keyring(file),
        Backend::File(path) => {
            delete_file(path);
            Ok(())
        }
    }
}

/// Get the studiobook config directory
pub(crate) fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Failed to find config directory")?;
    Ok(config_dir.join("studiobook"))
}

/// Get the credentials file path for file-based storage
fn get_credentials_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CREDENTIALS_FILE))
}

// ============================================================================
// File-based storage (always available)
// ============================================================================

fn save_to_file(path: &Path, creds: &StoredCredentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create credentials directory")?;
    }
    let json = serde_json::to_string(creds).context("Failed to serialize credentials")?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .context("Failed to create credentials file")?;
        file.write_all(json.as_bytes())
            .context("Failed to write credentials")?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, &json).context("Failed to write credentials file")?;
    }

    tracing::debug!("Credentials saved to file: {:?}", path);
    Ok(())
}

fn load_from_file(path: &Path) -> Result<Option<StoredCredentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).context("Failed to read credentials file")?;
    let creds: StoredCredentials =
        serde_json::from_str(&content).context("Failed to parse credentials file")?;
    Ok(Some(creds))
}

fn delete_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to delete credentials file: {}", e);
        }
    }
}

// ============================================================================
// Keyring-based storage (optional, platform-specific)
// ============================================================================

#[cfg(feature = "keyring-storage")]
fn get_keyring_entry() -> Result<Entry> {
    Entry::new(KEYRING_SERVICE, KEYRING_USER).map_err(|e| {
        tracing::error!(
            "Failed to create keyring entry (service='{}', user='{}'): {}",
            KEYRING_SERVICE,
            KEYRING_USER,
            e
        );
        anyhow::anyhow!("Failed to create keyring entry: {}", e)
    })
}

#[cfg(feature = "keyring-storage")]
fn save_to_keyring(file: &Path, creds: &StoredCredentials) -> Result<()> {
    let entry = match get_keyring_entry() {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("{}, using file storage", e);
            return save_to_file(file, creds);
        }
    };

    let json = serde_json::to_string(creds).context("Failed to serialize credentials")?;
    if let Err(e) = entry.set_password(&json) {
        tracing::warn!(
            "Failed to save credentials to keyring: {}, using file storage",
            e
        );
        return save_to_file(file, creds);
    }

    // Keep the file as a backup for sessions where the keyring is locked
    if let Err(e) = save_to_file(file, creds) {
        tracing::debug!("Failed to save backup credentials to file: {}", e);
    }
    Ok(())
}

#[cfg(feature = "keyring-storage")]
fn load_from_keyring(file: &Path) -> Result<Option<StoredCredentials>> {
    let entry = match get_keyring_entry() {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("{}, trying file fallback", e);
            return load_from_file(file);
        }
    };

    match entry.get_password() {
        Ok(json) => {
            tracing::debug!("Credentials loaded from keyring");
            let creds: StoredCredentials =
                serde_json::from_str(&json).context("Failed to parse credentials from keyring")?;
            Ok(Some(creds))
        }
        Err(keyring::Error::NoEntry) => {
            tracing::debug!("No credentials in keyring, trying file fallback");
            load_from_file(file)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to load credentials from keyring: {}, trying file fallback",
                e
            );
            load_from_file(file)
        }
    }
}

#[cfg(feature = "keyring-storage")]
fn delete_from_keyring(file: &Path) -> Result<()> {
    delete_file(file);
    erase_keyring_entry(&get_keyring_entry()?)
}

/// Delete the entry, or blank it when the keyring refuses the delete so the
/// next load still reads as signed out.
#[cfg(feature = "keyring-storage")]
fn erase_keyring_entry(entry: &Entry) -> Result<()> {
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => {
            tracing::warn!("Failed to delete keyring credentials: {}, overwriting", e);
            let json = serde_json::to_string(&StoredCredentials::default())
                .context("Failed to serialize credentials")?;
            entry
                .set_password(&json)
                .context("Failed to overwrite credentials in keyring")
        }
    }
}

/// Describe where credentials are stored (for `studiobook status`/`config`).
pub fn get_credential_storage_info() -> String {
    #[cfg(all(feature = "keyring-storage", target_os = "windows"))]
    {
        "Windows Credential Manager (with file fallback)".to_string()
    }
    #[cfg(all(feature = "keyring-storage", target_os = "macos"))]
    {
        "macOS Keychain (with file fallback)".to_string()
    }
    #[cfg(all(
        feature = "keyring-storage",
        not(any(target_os = "windows", target_os = "macos"))
    ))]
    {
        "Secret Service (GNOME Keyring/KWallet, with file fallback)".to_string()
    }
    #[cfg(not(feature = "keyring-storage"))]
    {
        let path = get_credentials_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "~/.config/studiobook/.credentials".to_string());
        format!("File-based storage: {}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(tag: &str) -> SessionCredentials {
        SessionCredentials {
            access_token: format!("access-{tag}"),
            refresh_token: format!("refresh-{tag}"),
            device_id: format!("device-{tag}"),
        }
    }

    #[test]
    fn memory_store_session_requires_all_three_values() {
        let store = MemoryCredentialStore::new();
        assert!(store.session().is_none());

        store.set(CredentialKey::AccessToken, "a").unwrap();
        store.set(CredentialKey::RefreshToken, "r").unwrap();
        assert!(store.session().is_none());

        store.set(CredentialKey::DeviceId, "d").unwrap();
        let creds = store.session().unwrap();
        assert_eq!(creds.access_token, "a");
        assert_eq!(creds.device_id, "d");
    }

    #[test]
    fn empty_access_token_is_treated_as_absent() {
        let store = MemoryCredentialStore::new();
        store.set(CredentialKey::AccessToken, "").unwrap();
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some(""));
        assert!(store.access_token().is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let store = MemoryCredentialStore::with_session(&session("1"));
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.get(CredentialKey::AccessToken).is_none());
        assert!(store.get(CredentialKey::RefreshToken).is_none());
        assert!(store.get(CredentialKey::DeviceId).is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".credentials");

        let store = SecureCredentialStore::with_file(&path).unwrap();
        store.set_session(&session("1")).unwrap();
        drop(store);

        let reopened = SecureCredentialStore::with_file(&path).unwrap();
        assert_eq!(reopened.session(), Some(session("1")));
    }

    #[test]
    fn file_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials");

        let store = SecureCredentialStore::with_file(&path).unwrap();
        store.set_session(&session("1")).unwrap();
        assert!(path.exists());

        store.clear().unwrap();
        assert!(!path.exists());
        assert!(store.session().is_none());

        let reopened = SecureCredentialStore::with_file(&path).unwrap();
        assert!(reopened.access_token().is_none());
    }

    #[test]
    fn renew_replaces_only_the_session_it_refreshed() {
        let store = MemoryCredentialStore::with_session(&session("1"));

        assert!(!store.renew_session("refresh-0", "device-1", &session("2")).unwrap());
        assert_eq!(store.session(), Some(session("1")));

        assert!(store.renew_session("refresh-1", "device-1", &session("2")).unwrap());
        assert_eq!(store.session(), Some(session("2")));
    }

    #[test]
    fn renew_after_clear_keeps_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials");
        let store = SecureCredentialStore::with_file(&path).unwrap();
        store.set_session(&session("1")).unwrap();
        store.clear().unwrap();

        assert!(!store.renew_session("refresh-1", "device-1", &session("2")).unwrap());
        assert!(store.session().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_sets_on_different_keys_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials");
        let store = std::sync::Arc::new(SecureCredentialStore::with_file(&path).unwrap());

        let handles: Vec<_> = [
            (CredentialKey::AccessToken, "a"),
            (CredentialKey::RefreshToken, "r"),
            (CredentialKey::DeviceId, "d"),
        ]
        .into_iter()
        .map(|(key, value)| {
            let store = store.clone();
            std::thread::spawn(move || store.set(key, value).unwrap())
        })
        .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected = SessionCredentials {
            access_token: "a".into(),
            refresh_token: "r".into(),
            device_id: "d".into(),
        };
        assert_eq!(store.session(), Some(expected.clone()));
        let reopened = SecureCredentialStore::with_file(&path).unwrap();
        assert_eq!(reopened.session(), Some(expected));
    }

    #[cfg(feature = "keyring-storage")]
    #[test]
    fn refused_keyring_delete_blanks_the_entry() {
        use keyring::mock::MockCredential;

        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER).unwrap();
        let saved = serde_json::to_string(&StoredCredentials::from(&session("1"))).unwrap();
        entry.set_password(&saved).unwrap();

        let mock: &MockCredential = entry.get_credential().downcast_ref().unwrap();
        mock.set_error(keyring::Error::PlatformFailure("keyring locked".into()));
        erase_keyring_entry(&entry).unwrap();

        let left: StoredCredentials = serde_json::from_str(&entry.get_password().unwrap()).unwrap();
        assert!(left.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials");
        let store = SecureCredentialStore::with_file(&path).unwrap();
        store.set(CredentialKey::AccessToken, "a").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
