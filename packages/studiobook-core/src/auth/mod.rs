//! Local session state: the credential store and the cached profile.

mod credentials;
mod profile_cache;

pub use credentials::{
    get_credential_storage_info, CredentialKey, CredentialStore, MemoryCredentialStore,
    SecureCredentialStore, SessionCredentials,
};
pub(crate) use credentials::get_config_dir;
pub use profile_cache::{CachedProfile, FileProfileCache, MemoryProfileCache, ProfileCache};
