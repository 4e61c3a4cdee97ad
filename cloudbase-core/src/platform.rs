//! Platform adapter registry.
//!
//! This module provides:
//! - [`Runtime`] - The runtime kinds the SDK distinguishes
//! - [`Adapter`] - The capability bundle a runtime supplies
//! - [`Location`] - Current address and navigation for redirect flows
//! - [`NativeAdapter`] - The default adapter for native hosts
//! - [`PlatformHandle`] - The single mutable "current platform" slot
//!
//! The handle is an explicit context object. Components receive it (or what
//! it resolved to) by reference; [`PlatformHandle::global`] exists only for
//! the outermost composition point.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::cache::{FileStorage, MemoryStorage, StorageBackend, StoreError};
use crate::config::Persistence;
use crate::error::SdkResult;
use crate::transport::{HttpTransport, Transport, TransportConfig};

/// Runtime kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    Web,
    /// Hybrid miniprogram runtime.
    MiniApp,
    Native,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::MiniApp => "wx_mp",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current address and navigation of the host.
///
/// Navigation is a one-way transfer of control: after [`assign`](Location::assign)
/// succeeds the caller must not expect to resume in-process.
pub trait Location: Send + Sync {
    /// The current address.
    fn href(&self) -> String;

    /// Navigate to `url`.
    fn assign(&self, url: &str) -> anyhow::Result<()>;
}

/// In-process location for hosts without a browser.
///
/// Navigations are recorded instead of performed; the host decides how to
/// present them (e.g. print the URL).
#[derive(Debug, Default)]
pub struct MemoryLocation {
    href: RwLock<String>,
    navigations: RwLock<Vec<String>>,
}

impl MemoryLocation {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: RwLock::new(href.into()),
            navigations: RwLock::new(Vec::new()),
        }
    }

    /// Replace the current address, e.g. with the URL a redirect landed on.
    pub fn set_href(&self, href: impl Into<String>) {
        *self.href.write() = href.into();
    }

    /// The most recent navigation target.
    pub fn last_navigation(&self) -> Option<String> {
        self.navigations.read().last().cloned()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.read().clone()
    }
}

impl Location for MemoryLocation {
    fn href(&self) -> String {
        self.href.read().clone()
    }

    fn assign(&self, url: &str) -> anyhow::Result<()> {
        url::Url::parse(url)?;
        self.navigations.write().push(url.to_string());
        Ok(())
    }
}

/// Runtime-specific capability bundle.
pub trait Adapter: Send + Sync {
    /// The runtime this adapter serves.
    fn runtime(&self) -> Runtime;

    /// Whether this adapter matches the running host.
    fn is_match(&self) -> bool;

    /// Construct a transport bound to the given settings.
    fn create_transport(&self, config: TransportConfig) -> SdkResult<Arc<dyn Transport>>;

    /// This runtime's signed application identity, if it can report one.
    fn app_sign(&self) -> Option<String> {
        None
    }

    /// Storage primitives for an env under a persistence mode.
    fn storage(&self, env: &str, persistence: Persistence)
        -> Result<Arc<dyn StorageBackend>, StoreError>;

    /// Current address and navigation.
    fn location(&self) -> Arc<dyn Location>;
}

/// Default adapter for native hosts.
///
/// - `Session` storage is shared in-process per env, so it outlives caches
///   and providers.
/// - `Local` storage is a JSON file (or the OS keyring when preferred).
/// - `None` storage is fresh memory every time it is provisioned.
pub struct NativeAdapter {
    runtime: Runtime,
    app_sign: Option<String>,
    data_path: Option<PathBuf>,
    prefer_keyring: bool,
    location: Arc<MemoryLocation>,
    sessions: RwLock<HashMap<String, Arc<MemoryStorage>>>,
    local: RwLock<Option<Arc<dyn StorageBackend>>>,
}

impl NativeAdapter {
    pub fn new() -> Self {
        Self {
            runtime: Runtime::Native,
            app_sign: None,
            data_path: None,
            prefer_keyring: false,
            location: Arc::new(MemoryLocation::default()),
            sessions: RwLock::new(HashMap::new()),
            local: RwLock::new(None),
        }
    }

    /// Report a different runtime kind (e.g. when embedded in a webview).
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_app_sign(mut self, app_sign: impl Into<String>) -> Self {
        self.app_sign = Some(app_sign.into());
        self
    }

    /// Path of the file used for `local` persistence.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Prefer the OS keyring for `local` persistence when available.
    pub fn with_keyring(mut self, prefer: bool) -> Self {
        self.prefer_keyring = prefer;
        self
    }

    pub fn with_location(mut self, location: Arc<MemoryLocation>) -> Self {
        self.location = location;
        self
    }

    /// The location this adapter navigates through.
    pub fn memory_location(&self) -> Arc<MemoryLocation> {
        self.location.clone()
    }

    fn local_storage(&self) -> Result<Arc<dyn StorageBackend>, StoreError> {
        if let Some(storage) = self.local.read().as_ref() {
            return Ok(storage.clone());
        }

        let storage = create_local_storage(self.prefer_keyring, self.data_path.clone())?;
        let mut slot = self.local.write();
        Ok(slot.get_or_insert(storage).clone())
    }
}

impl Default for NativeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for NativeAdapter {
    fn runtime(&self) -> Runtime {
        self.runtime
    }

    fn is_match(&self) -> bool {
        cfg!(not(target_arch = "wasm32"))
    }

    fn create_transport(&self, config: TransportConfig) -> SdkResult<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(config)?))
    }

    fn app_sign(&self) -> Option<String> {
        self.app_sign.clone()
    }

    fn storage(
        &self,
        env: &str,
        persistence: Persistence,
    ) -> Result<Arc<dyn StorageBackend>, StoreError> {
        match persistence {
            Persistence::Session => {
                let mut sessions = self.sessions.write();
                let storage = sessions
                    .entry(env.to_string())
                    .or_insert_with(|| Arc::new(MemoryStorage::new()))
                    .clone();
                Ok(storage)
            }
            Persistence::Local => self.local_storage(),
            Persistence::None => Ok(Arc::new(MemoryStorage::new())),
        }
    }

    fn location(&self) -> Arc<dyn Location> {
        self.location.clone()
    }
}

/// Create durable storage, preferring the keyring when asked and available.
fn create_local_storage(
    prefer_keyring: bool,
    data_path: Option<PathBuf>,
) -> Result<Arc<dyn StorageBackend>, StoreError> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match crate::cache::KeyringStorage::try_new("cloudbase") {
            Ok(store) => {
                tracing::info!("Using OS keyring for local persistence");
                return Ok(Arc::new(store));
            }
            Err(e) => {
                tracing::warn!("Keyring unavailable ({}), falling back to file storage", e);
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "Keyring storage requested but keyring-store feature not enabled, using file storage"
        );
    }

    let path = data_path
        .or_else(FileStorage::default_path)
        .unwrap_or_else(|| PathBuf::from(".cloudbase/credentials.json"));
    tracing::debug!("Using file storage at {:?}", path);
    Ok(Arc::new(FileStorage::load_from_path(path)?))
}

/// The active runtime and its adapter.
#[derive(Clone)]
pub struct PlatformInfo {
    pub runtime: Runtime,
    pub adapter: Arc<dyn Adapter>,
}

impl fmt::Debug for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformInfo")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// The single mutable "current platform" slot.
#[derive(Debug, Default)]
pub struct PlatformHandle {
    current: RwLock<Option<PlatformInfo>>,
}

impl PlatformHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-scoped handle for the outermost composition point.
    pub fn global() -> Arc<PlatformHandle> {
        static GLOBAL: OnceLock<Arc<PlatformHandle>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(PlatformHandle::new())).clone()
    }

    /// Install the first candidate that matches the running host.
    ///
    /// Leaves the current platform unchanged when nothing matches. Returns
    /// whether an adapter was installed.
    pub fn use_adapters<I>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = Arc<dyn Adapter>>,
    {
        match candidates.into_iter().find(|adapter| adapter.is_match()) {
            Some(adapter) => {
                let runtime = adapter.runtime();
                tracing::debug!(%runtime, "adapter selected");
                *self.current.write() = Some(PlatformInfo { runtime, adapter });
                true
            }
            None => {
                tracing::debug!("no offered adapter matches this host, platform unchanged");
                false
            }
        }
    }

    /// Install the default native adapter.
    pub fn use_default_adapter(&self) {
        *self.current.write() = Some(default_platform());
        tracing::debug!("default adapter installed");
    }

    /// The active platform, installing the default adapter on first use.
    pub fn current(&self) -> PlatformInfo {
        if let Some(info) = self.current.read().as_ref() {
            return info.clone();
        }
        let mut slot = self.current.write();
        slot.get_or_insert_with(|| {
            tracing::debug!("no adapter selected, falling back to default adapter");
            default_platform()
        })
        .clone()
    }

    /// The active platform without falling back.
    pub fn selected(&self) -> Option<PlatformInfo> {
        self.current.read().clone()
    }
}

fn default_platform() -> PlatformInfo {
    let adapter: Arc<dyn Adapter> = Arc::new(NativeAdapter::new());
    PlatformInfo {
        runtime: adapter.runtime(),
        adapter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    struct Unmatched;

    impl Adapter for Unmatched {
        fn runtime(&self) -> Runtime {
            Runtime::MiniApp
        }
        fn is_match(&self) -> bool {
            false
        }
        fn create_transport(&self, _config: TransportConfig) -> SdkResult<Arc<dyn Transport>> {
            Err(SdkError::Unknown {
                message: "unsupported".to_string(),
            })
        }
        fn storage(
            &self,
            _env: &str,
            _persistence: Persistence,
        ) -> Result<Arc<dyn StorageBackend>, StoreError> {
            Ok(Arc::new(MemoryStorage::new()))
        }
        fn location(&self) -> Arc<dyn Location> {
            Arc::new(MemoryLocation::default())
        }
    }

    #[test]
    fn test_use_adapters_picks_first_match() {
        let handle = PlatformHandle::new();
        let installed = handle.use_adapters([
            Arc::new(Unmatched) as Arc<dyn Adapter>,
            Arc::new(NativeAdapter::new().with_runtime(Runtime::Web)),
        ]);
        assert!(installed);
        assert_eq!(handle.selected().unwrap().runtime, Runtime::Web);
    }

    #[test]
    fn test_use_adapters_without_match_keeps_current() {
        let handle = PlatformHandle::new();
        handle.use_adapters([Arc::new(NativeAdapter::new().with_runtime(Runtime::Web)) as Arc<dyn Adapter>]);

        let installed = handle.use_adapters([Arc::new(Unmatched) as Arc<dyn Adapter>]);
        assert!(!installed);
        assert_eq!(handle.selected().unwrap().runtime, Runtime::Web);
    }

    #[test]
    fn test_current_falls_back_to_default() {
        let handle = PlatformHandle::new();
        assert!(handle.selected().is_none());
        assert_eq!(handle.current().runtime, Runtime::Native);
        assert!(handle.selected().is_some());
    }

    #[test]
    fn test_use_default_adapter_replaces_selection() {
        let handle = PlatformHandle::new();
        handle.use_adapters([Arc::new(NativeAdapter::new().with_runtime(Runtime::Web)) as Arc<dyn Adapter>]);

        handle.use_default_adapter();

        assert_eq!(handle.selected().unwrap().runtime, Runtime::Native);
        assert_eq!(handle.current().runtime, Runtime::Native);
    }

    #[test]
    fn test_session_storage_shared_per_env() {
        let adapter = NativeAdapter::new();
        let a = adapter.storage("env", Persistence::Session).unwrap();
        let b = adapter.storage("env", Persistence::Session).unwrap();
        let other = adapter.storage("other", Persistence::Session).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));

        let n1 = adapter.storage("env", Persistence::None).unwrap();
        let n2 = adapter.storage("env", Persistence::None).unwrap();
        assert!(!Arc::ptr_eq(&n1, &n2));
    }

    #[test]
    fn test_memory_location_records_navigation() {
        let location = MemoryLocation::new("https://app.example.com/");
        location.assign("https://open.weixin.qq.com/connect/qrconnect?appid=A").unwrap();
        assert_eq!(
            location.last_navigation().as_deref(),
            Some("https://open.weixin.qq.com/connect/qrconnect?appid=A")
        );
        assert!(location.assign("not a url").is_err());
    }
}
