//! Integration tests for SDK initialization and configuration.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use cloudbase_core::{
    Adapter, CacheSlot, Cloudbase, ConfigUpdate, ErrorKind, EventBus, Extension, InitOptions,
    NativeAdapter, Persistence, PlatformHandle, Runtime, SdkResult,
};

fn sdk_on(adapter: NativeAdapter) -> Cloudbase {
    let platform = Arc::new(PlatformHandle::new());
    assert!(platform.use_adapters([Arc::new(adapter) as Arc<dyn Adapter>]));
    Cloudbase::with_context(platform, Arc::new(EventBus::new()))
}

fn web_sdk() -> Cloudbase {
    sdk_on(NativeAdapter::new().with_runtime(Runtime::Web))
}

#[tokio::test]
async fn test_defaults() {
    let config = web_sdk().init(InitOptions::new("env")).unwrap().config().unwrap();

    assert_eq!(config.timeout_ms, 15_000);
    assert_eq!(config.persistence, Persistence::Session);
    assert!(!config.debug);
}

#[tokio::test]
async fn test_timeout_is_clamped() {
    let sdk = web_sdk();

    let low = sdk.init(InitOptions::new("env").with_timeout(1)).unwrap();
    let high = sdk.init(InitOptions::new("env").with_timeout(3_600_000)).unwrap();
    let kept = sdk.init(InitOptions::new("env").with_timeout(2_500)).unwrap();

    assert_eq!(low.config().unwrap().timeout_ms, 100);
    assert_eq!(high.config().unwrap().timeout_ms, 600_000);
    assert_eq!(kept.config().unwrap().timeout_ms, 2_500);
}

#[tokio::test]
async fn test_empty_env_is_rejected() {
    let err = web_sdk().init(InitOptions::new("  ")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
}

#[tokio::test]
async fn test_native_runtime_requires_app_secret() {
    let sdk = sdk_on(NativeAdapter::new().with_app_sign("com.example.app"));

    let err = sdk.init(InitOptions::new("env")).unwrap_err();
    assert!(err.to_string().contains("invalid appSecret"));

    let app = sdk
        .init(InitOptions::new("env").with_app_secret("id", "key"))
        .unwrap();
    assert_eq!(
        app.config().unwrap().app_sign.as_deref(),
        Some("com.example.app")
    );
}

#[tokio::test]
async fn test_native_runtime_app_sign_must_agree_with_adapter() {
    let sdk = sdk_on(NativeAdapter::new().with_app_sign("com.example.app"));

    let err = sdk
        .init(
            InitOptions::new("env")
                .with_app_secret("id", "key")
                .with_app_sign("com.other.app"),
        )
        .unwrap_err();
    assert!(err.to_string().contains("invalid appSign"));
}

#[tokio::test]
async fn test_native_runtime_requires_some_app_sign() {
    let sdk = sdk_on(NativeAdapter::new());

    let err = sdk
        .init(InitOptions::new("env").with_app_secret("id", "key"))
        .unwrap_err();
    assert!(err.to_string().contains("invalid appSign"));

    let app = sdk
        .init(
            InitOptions::new("env")
                .with_app_secret("id", "key")
                .with_app_sign("com.example.app"),
        )
        .unwrap();
    assert!(app.is_configured());
}

#[tokio::test]
async fn test_envs_do_not_share_credentials() {
    let sdk = web_sdk();
    let first = sdk.init(InitOptions::new("env-a")).unwrap();
    let second = sdk.init(InitOptions::new("env-b")).unwrap();

    first
        .cache()
        .unwrap()
        .set_store_async(CacheSlot::RefreshToken, "rt-a")
        .await
        .unwrap();

    assert!(second.cache().unwrap().get_store(CacheSlot::RefreshToken).unwrap().is_none());
    assert!(first.get_login_state().await.unwrap().is_some());
    assert!(second.get_login_state().await.unwrap().is_none());
}

#[tokio::test]
async fn test_handles_of_one_env_share_session_guard() {
    let sdk = web_sdk();
    let first = sdk.init(InitOptions::new("env-shared")).unwrap();
    let second = sdk.init(InitOptions::new("env-shared")).unwrap();
    let first_cache = first.cache().unwrap();
    let second_cache = second.cache().unwrap();

    let held = first_cache.session_guard().await;
    let blocked = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        second_cache.session_guard(),
    )
    .await;
    assert!(blocked.is_err());

    drop(held);
    second_cache
        .set_store_async(CacheSlot::RefreshToken, "rt-shared")
        .await
        .unwrap();
    assert!(first_cache.get_store(CacheSlot::RefreshToken).unwrap().is_some());
}

#[tokio::test]
async fn test_update_config_reprovisions_cache() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = sdk_on(
        NativeAdapter::new()
            .with_runtime(Runtime::Web)
            .with_data_path(dir.path().join("credentials.json")),
    );
    let app = sdk.init(InitOptions::new("env")).unwrap();
    app.cache()
        .unwrap()
        .set_store_async(CacheSlot::RefreshToken, "session-rt")
        .await
        .unwrap();

    app.update_config(ConfigUpdate {
        persistence: Persistence::Local,
        debug: true,
    })
    .unwrap();

    let config = app.config().unwrap();
    assert_eq!(config.persistence, Persistence::Local);
    assert!(config.debug);

    let cache = app.cache().unwrap();
    assert_eq!(cache.persistence(), Persistence::Local);
    assert!(cache.get_store(CacheSlot::RefreshToken).unwrap().is_none());

    cache
        .set_store_async(CacheSlot::RefreshToken, "local-rt")
        .await
        .unwrap();
    assert!(dir.path().join("credentials.json").exists());
}

#[tokio::test]
async fn test_update_config_on_unconfigured_handle_fails() {
    let err = web_sdk()
        .update_config(ConfigUpdate {
            persistence: Persistence::None,
            debug: false,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

struct Greeter;

#[async_trait]
impl Extension for Greeter {
    fn name(&self) -> &str {
        "greeter"
    }

    async fn invoke(&self, options: Value, sdk: &Cloudbase) -> SdkResult<Value> {
        let env = sdk.config()?.env;
        Ok(json!({ "hello": options["name"], "env": env }))
    }
}

#[tokio::test]
async fn test_extensions_are_shared_with_configured_handles() {
    let sdk = web_sdk();
    sdk.register_extension(Arc::new(Greeter));
    let app = sdk.init(InitOptions::new("env-ext")).unwrap();

    let result = app
        .invoke_extension("greeter", json!({ "name": "cloudbase" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "hello": "cloudbase", "env": "env-ext" }));

    let err = app.invoke_extension("missing", Value::Null).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
}
