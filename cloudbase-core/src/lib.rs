//! # CloudBase Core
//!
//! Credential lifecycle engine for the CloudBase client SDK.
//!
//! This crate provides:
//! - Platform adapter selection and an explicit platform context
//! - SDK configuration, resolved per env into independent handles
//! - A per-env credential cache over pluggable storage backends
//! - The WeChat redirect/OAuth provider and login state reconciliation
//! - A synchronous auth event bus and an extension registry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cloudbase_core::{AuthProvider, Cloudbase, InitOptions, RedirectOptions};
//!
//! async fn complete_login() -> cloudbase_core::SdkResult<()> {
//!     let app = Cloudbase::new().init(InitOptions::new("my-env"))?;
//!     let provider = app.weixin_auth_provider("wx123", "snsapi_login", None)?;
//!     if let Some(state) = provider.get_redirect_result(RedirectOptions::default()).await? {
//!         println!("logged in: {}", state.is_logged_in());
//!     }
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod extension;
pub mod platform;
pub mod request;
pub mod transport;

// Re-export commonly used types at crate root
pub use app::{Cloudbase, Protocol};

pub use auth::{
    AuthProvider,
    LinkOptions,
    LoginState,
    LoginStatus,
    LoginType,
    ProviderContext,
    RedirectOptions,
    RedirectPhase,
    WeixinAuthProvider,
    WeixinLoginType,
};

pub use cache::{
    CacheSlot,
    CredentialCache,
    FileStorage,
    MemoryStorage,
    Secret,
    StorageBackend,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use cache::KeyringStorage;

pub use config::{
    AppSecret,
    ConfigUpdate,
    InitOptions,
    Persistence,
    SdkConfig,
};

pub use error::{DeprecationWarning, ErrorKind, SdkError, SdkResult};

pub use events::{AuthEvent, EventBus, EventKind, ListenerId};

pub use extension::{Extension, ExtensionRegistry};

pub use platform::{
    Adapter,
    Location,
    MemoryLocation,
    NativeAdapter,
    PlatformHandle,
    PlatformInfo,
    Runtime,
};

pub use request::{CloudbaseRequest, RequestChannel, RequestConfig};

pub use transport::{HttpTransport, Transport, TransportConfig, TransportRequest};
