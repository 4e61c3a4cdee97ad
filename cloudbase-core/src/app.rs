//! SDK entry point.
//!
//! A [`Cloudbase`] handle starts unconfigured: it can select adapters and
//! register extensions, nothing else. [`Cloudbase::init`] returns a *new*,
//! configured handle bound to one env, so several envs can coexist in one
//! process.

use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::auth::{self, LoginState, LoginStatus, ProviderContext, WeixinAuthProvider};
use crate::cache::CredentialCache;
use crate::config::{ConfigUpdate, DEFAULT_ENDPOINT, DEFAULT_SDK_VERSION, InitOptions, Persistence, SdkConfig};
use crate::error::{SdkError, SdkResult};
use crate::events::EventBus;
use crate::extension::{Extension, ExtensionRegistry};
use crate::platform::{Adapter, PlatformHandle, PlatformInfo, Runtime};
use crate::request::{CloudbaseRequest, RequestChannel, RequestConfig};
use crate::transport::TransportConfig;

/// Scheme used to reach the backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Endpoint and version settings shared by a handle and the handles it
/// configures. Changes apply to handles configured afterwards.
#[derive(Debug, Clone)]
struct SharedSettings {
    endpoint: String,
    sdk_version: String,
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sdk_version: DEFAULT_SDK_VERSION.to_string(),
        }
    }
}

struct Configured {
    config: RwLock<SdkConfig>,
    runtime: Runtime,
    adapter: Arc<dyn Adapter>,
    cache: RwLock<Arc<CredentialCache>>,
    request: Arc<dyn RequestChannel>,
}

/// SDK handle.
pub struct Cloudbase {
    platform: Arc<PlatformHandle>,
    events: Arc<EventBus>,
    extensions: Arc<ExtensionRegistry>,
    settings: Arc<RwLock<SharedSettings>>,
    configured: Option<Configured>,
}

impl Cloudbase {
    /// Unconfigured handle using the process-wide platform and event bus.
    pub fn new() -> Self {
        Self::with_context(PlatformHandle::global(), EventBus::global())
    }

    /// Unconfigured handle using explicit platform and event bus instances.
    pub fn with_context(platform: Arc<PlatformHandle>, events: Arc<EventBus>) -> Self {
        Self {
            platform,
            events,
            extensions: Arc::new(ExtensionRegistry::new()),
            settings: Arc::new(RwLock::new(SharedSettings::default())),
            configured: None,
        }
    }

    /// Configure a new handle for one env.
    ///
    /// Falls back to the default adapter when none was selected.
    pub fn init(&self, options: InitOptions) -> SdkResult<Cloudbase> {
        let PlatformInfo { runtime, adapter } = self.platform.current();

        let mut config = SdkConfig::resolve(options, runtime, adapter.app_sign())?;
        {
            let settings = self.settings.read();
            config.endpoint = settings.endpoint.clone();
            config.sdk_version = settings.sdk_version.clone();
        }

        let transport = adapter.create_transport(TransportConfig {
            timeout: config.timeout(),
        })?;
        let cache = provision_cache(adapter.as_ref(), &config.env, config.persistence)?;
        let request: Arc<dyn RequestChannel> = Arc::new(CloudbaseRequest::new(
            RequestConfig::from_sdk_config(&config, runtime),
            transport,
        ));

        tracing::info!(
            env = %config.env,
            %runtime,
            persistence = %config.persistence,
            timeout_ms = config.timeout_ms,
            "cloudbase initialized"
        );

        Ok(Cloudbase {
            platform: self.platform.clone(),
            events: self.events.clone(),
            extensions: self.extensions.clone(),
            settings: self.settings.clone(),
            configured: Some(Configured {
                config: RwLock::new(config),
                runtime,
                adapter,
                cache: RwLock::new(cache),
                request,
            }),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    fn configured(&self) -> SdkResult<&Configured> {
        self.configured.as_ref().ok_or_else(|| {
            SdkError::invalid_operation("cloudbase must be initialized with init() first")
        })
    }

    /// Change persistence and debug; re-provisions the cache for the same env.
    ///
    /// Entries cached under the previous persistence mode are not migrated.
    pub fn update_config(&self, update: ConfigUpdate) -> SdkResult<()> {
        let configured = self.configured()?;
        let env = configured.config.read().env.clone();
        let cache = provision_cache(configured.adapter.as_ref(), &env, update.persistence)?;

        {
            let mut config = configured.config.write();
            config.persistence = update.persistence;
            config.debug = update.debug;
        }
        *configured.cache.write() = cache;
        tracing::debug!(%env, persistence = %update.persistence, "cache re-provisioned");
        Ok(())
    }

    pub fn config(&self) -> SdkResult<SdkConfig> {
        Ok(self.configured()?.config.read().clone())
    }

    pub fn runtime(&self) -> SdkResult<Runtime> {
        Ok(self.configured()?.runtime)
    }

    pub fn platform(&self) -> &Arc<PlatformHandle> {
        &self.platform
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> SdkResult<Arc<CredentialCache>> {
        Ok(self.configured()?.cache.read().clone())
    }

    pub fn request(&self) -> SdkResult<Arc<dyn RequestChannel>> {
        Ok(self.configured()?.request.clone())
    }

    /// Install the first matching adapter on the shared platform handle.
    pub fn use_adapters<I>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = Arc<dyn Adapter>>,
    {
        self.platform.use_adapters(candidates)
    }

    pub fn register_extension(&self, extension: Arc<dyn Extension>) {
        self.extensions.register(extension);
    }

    pub async fn invoke_extension(&self, name: &str, options: Value) -> SdkResult<Value> {
        self.extensions.invoke(name, options, self).await
    }

    /// Backend endpoint for handles configured afterwards.
    ///
    /// `url` may be protocol-relative (`//host/path`) or carry a scheme; an
    /// explicit `protocol` wins over the scheme in `url`.
    pub fn register_endpoint(&self, url: &str, protocol: Option<Protocol>) {
        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, url.trim_start_matches("//")),
        };
        let scheme = protocol
            .map(|p| p.as_str())
            .or(scheme)
            .unwrap_or(Protocol::default().as_str());
        self.settings.write().endpoint = format!("{scheme}://{rest}");
    }

    /// SDK version reported by handles configured afterwards.
    pub fn register_version(&self, version: impl Into<String>) {
        self.settings.write().sdk_version = version.into();
    }

    /// Everything an auth provider is bound to, snapshotted now.
    pub fn provider_context(&self) -> SdkResult<ProviderContext> {
        let configured = self.configured()?;
        let config = configured.config.read();
        Ok(ProviderContext {
            env: config.env.clone(),
            persistence: config.persistence,
            cache: configured.cache.read().clone(),
            request: configured.request.clone(),
            runtime: configured.runtime,
            events: self.events.clone(),
            location: configured.adapter.location(),
        })
    }

    /// WeChat redirect provider bound to this handle.
    pub fn weixin_auth_provider(
        &self,
        appid: impl Into<String>,
        scope: impl Into<String>,
        state: Option<String>,
    ) -> SdkResult<WeixinAuthProvider> {
        Ok(WeixinAuthProvider::new(
            self.provider_context()?,
            appid,
            scope,
            state,
        ))
    }

    /// Reconciled login state, or `None` when no session is cached.
    pub async fn get_login_state(&self) -> SdkResult<Option<LoginState>> {
        let ctx = self.provider_context()?;
        let mut login_state = LoginState::from_context(&ctx);
        login_state.check_local_state_async().await;
        match login_state.status() {
            LoginStatus::NoSession => Ok(None),
            _ => Ok(Some(login_state)),
        }
    }

    /// End the current session of this env.
    pub async fn sign_out(&self) -> SdkResult<()> {
        auth::sign_out(&self.provider_context()?).await
    }
}

impl Default for Cloudbase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cloudbase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Cloudbase");
        match &self.configured {
            Some(configured) => s
                .field("config", &*configured.config.read())
                .field("runtime", &configured.runtime),
            None => s.field("configured", &false),
        };
        s.finish()
    }
}

fn provision_cache(
    adapter: &dyn Adapter,
    env: &str,
    persistence: Persistence,
) -> SdkResult<Arc<CredentialCache>> {
    let backend = adapter.storage(env, persistence)?;
    Ok(Arc::new(CredentialCache::new(env, persistence, backend)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::platform::NativeAdapter;

    fn isolated() -> Cloudbase {
        let platform = Arc::new(PlatformHandle::new());
        platform.use_adapters([Arc::new(NativeAdapter::new().with_runtime(Runtime::Web)) as Arc<dyn Adapter>]);
        Cloudbase::with_context(platform, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_unconfigured_handle_is_not_a_client() {
        let sdk = isolated();
        assert!(!sdk.is_configured());
        assert_eq!(sdk.cache().unwrap_err().kind(), ErrorKind::InvalidOperation);
        assert!(sdk.request().is_err());
        assert!(sdk.weixin_auth_provider("wx", "snsapi_login", None).is_err());
    }

    #[tokio::test]
    async fn test_init_returns_new_handle() {
        let sdk = isolated();
        let app = sdk.init(InitOptions::new("env-1")).unwrap();
        assert!(app.is_configured());
        assert!(!sdk.is_configured());
        assert_eq!(app.config().unwrap().env, "env-1");
        assert_eq!(app.runtime().unwrap(), Runtime::Web);
    }

    #[test]
    fn test_register_endpoint() {
        let sdk = isolated();
        sdk.register_endpoint("//api.example.com/web", None);
        assert_eq!(sdk.settings.read().endpoint, "https://api.example.com/web");

        sdk.register_endpoint("https://api.example.com/web", Some(Protocol::Http));
        assert_eq!(sdk.settings.read().endpoint, "http://api.example.com/web");

        sdk.register_endpoint("http://localhost:8080/web", None);
        assert_eq!(sdk.settings.read().endpoint, "http://localhost:8080/web");
    }

    #[tokio::test]
    async fn test_registered_endpoint_and_version_apply_to_new_handles() {
        let sdk = isolated();
        sdk.register_endpoint("//api.example.com/web", None);
        sdk.register_version("9.9.9");

        let config = sdk.init(InitOptions::new("env")).unwrap().config().unwrap();
        assert_eq!(config.endpoint, "https://api.example.com/web");
        assert_eq!(config.sdk_version, "9.9.9");
    }
}
