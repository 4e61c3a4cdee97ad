//! Credential cache with typed slots.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`StorageBackend`] - Trait for the storage primitives an adapter supplies
//! - [`MemoryStorage`], [`FileStorage`] and (with `keyring-store`) [`KeyringStorage`]
//! - [`CacheSlot`] - The fixed set of named slots the auth core reads and writes
//! - [`CredentialCache`] - The env-scoped cache handed to auth providers
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `cloudbase/{env}/{slot}`, so two environments
//! configured in one process never see each other's credentials.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::Persistence;

mod file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

pub use file::FileStorage;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStorage;
pub use memory::MemoryStorage;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose) and is
/// zeroed when dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value. Never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for storage backend operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Storage primitives supplied by a runtime adapter.
///
/// Reads are synchronous (like web storage); writes may need real I/O and
/// are asynchronous, completing before the returned future resolves.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key doesn't exist.
    fn get_item(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Write a value, overwriting any existing one.
    async fn set_item(&self, key: &str, value: &Secret) -> Result<(), StoreError>;

    /// Remove a value. Succeeds even if the key didn't exist.
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// Named slots of the credential cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    /// Long-lived refresh token (`refreshTokenKey`).
    RefreshToken,
    /// Short-lived access token (`accessTokenKey`).
    AccessToken,
    /// Absolute access token expiry in epoch milliseconds (`accessTokenExpireKey`).
    AccessTokenExpire,
    /// Login type of the current session (`loginTypeKey`).
    LoginType,
    /// JSON encoded user info (`userInfoKey`).
    UserInfo,
}

impl CacheSlot {
    /// Slots that together make up a session.
    pub const CREDENTIALS: [CacheSlot; 3] = [
        CacheSlot::RefreshToken,
        CacheSlot::AccessToken,
        CacheSlot::AccessTokenExpire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshToken => "refresh_token",
            Self::AccessToken => "access_token",
            Self::AccessTokenExpire => "access_token_expire",
            Self::LoginType => "login_type",
            Self::UserInfo => "user_info",
        }
    }
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Env-scoped credential cache.
///
/// The cache does not resolve overwrite races itself; callers that write a
/// session hold [`session_guard`](CredentialCache::session_guard) for the
/// whole exchange. Caches over the same backend and env share that guard.
pub struct CredentialCache {
    env: String,
    persistence: Persistence,
    backend: Arc<dyn StorageBackend>,
    session: Arc<Mutex<()>>,
}

impl CredentialCache {
    pub fn new(
        env: impl Into<String>,
        persistence: Persistence,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        let env = env.into();
        let session = session_lock(&backend, &env);
        Self {
            env,
            persistence,
            backend,
            session,
        }
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Storage key of a slot in this cache's env.
    pub fn key(&self, slot: CacheSlot) -> String {
        format!("cloudbase/{}/{}", self.env, slot)
    }

    /// Read a slot.
    pub fn get_store(&self, slot: CacheSlot) -> Result<Option<Secret>, StoreError> {
        self.backend.get_item(&self.key(slot))
    }

    /// Write a slot; the value is persisted once this resolves.
    pub async fn set_store_async(
        &self,
        slot: CacheSlot,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let secret = Secret::new(value);
        self.backend.set_item(&self.key(slot), &secret).await?;
        tracing::trace!(env = %self.env, %slot, "cache slot written");
        Ok(())
    }

    pub fn remove_store(&self, slot: CacheSlot) -> Result<(), StoreError> {
        self.backend.remove_item(&self.key(slot))
    }

    /// Remove every session slot (tokens and expiry).
    pub fn clear_credentials(&self) -> Result<(), StoreError> {
        for slot in CacheSlot::CREDENTIALS {
            self.remove_store(slot)?;
        }
        Ok(())
    }

    /// Serializes "exchange, write, notify" sequences on this cache's storage.
    pub async fn session_guard(&self) -> MutexGuard<'_, ()> {
        self.session.lock().await
    }
}

type SessionLocks = parking_lot::Mutex<HashMap<(usize, String), Weak<Mutex<()>>>>;

/// The session lock for `env` on `backend`, shared with every live cache
/// over the same pair.
///
/// Entries are weak; a backend address can only be reused once every cache
/// holding it (and so its lock) is gone.
fn session_lock(backend: &Arc<dyn StorageBackend>, env: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<SessionLocks> = OnceLock::new();

    let key = (Arc::as_ptr(backend) as *const () as usize, env.to_string());
    let mut locks = LOCKS.get_or_init(Default::default).lock();
    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }
    locks.retain(|_, lock| lock.strong_count() > 0);

    let lock = Arc::new(Mutex::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("env", &self.env)
            .field("persistence", &self.persistence)
            .finish()
    }
}
