//! Authentication: providers, login types and the login state.
//!
//! This module provides:
//! - [`AuthProvider`] - The contract every credential mechanism implements
//! - [`ProviderContext`] - What a provider is bound to (cache, request, runtime, ...)
//! - [`LoginType`] / [`WeixinLoginType`] - Credential mechanism classifications
//! - [`weixin::WeixinAuthProvider`] - The redirect/OAuth provider
//! - [`login_state::LoginState`] - The reconciled session snapshot
//!
//! Redirect providers are resumable from durable state alone: everything
//! needed after a redirect comes from the current location and the cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheSlot, CredentialCache};
use crate::config::Persistence;
use crate::error::{SdkError, SdkResult};
use crate::events::{AuthEvent, EventBus};
use crate::platform::{Location, Runtime};
use crate::request::{RequestChannel, response_code, response_message};

pub mod login_state;
pub mod redirect;
pub mod weixin;

pub use login_state::{LoginState, LoginStatus};
pub use weixin::{RedirectPhase, WeixinAuthProvider};

/// Credential mechanism of a session, as recorded in the cache and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginType {
    Wechat,
    Anonymous,
    Custom,
    Email,
    Username,
    #[serde(rename = "NONE")]
    Null,
}

impl LoginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wechat => "WECHAT",
            Self::Anonymous => "ANONYMOUS",
            Self::Custom => "CUSTOM",
            Self::Email => "EMAIL",
            Self::Username => "USERNAME",
            Self::Null => "NONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WECHAT" => Some(Self::Wechat),
            "ANONYMOUS" => Some(Self::Anonymous),
            "CUSTOM" => Some(Self::Custom),
            "EMAIL" => Some(Self::Email),
            "USERNAME" => Some(Self::Username),
            "NONE" => Some(Self::Null),
            _ => None,
        }
    }
}

impl fmt::Display for LoginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth scope that selects the open-platform (QR code) login.
pub const SCOPE_OPEN_LOGIN: &str = "snsapi_login";
/// OAuth scope that grants no user info.
pub const SCOPE_BASE: &str = "snsapi_base";

/// Login type sent to the backend for WeChat codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeixinLoginType {
    /// Open platform (website QR login).
    Open,
    /// Public account (in-app browser login).
    Public,
}

impl WeixinLoginType {
    /// Classify a configured scope. Never fails: unknown scopes are public.
    pub fn from_scope(scope: &str) -> Self {
        match scope {
            SCOPE_OPEN_LOGIN => Self::Open,
            _ => Self::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "WECHAT-OPEN",
            Self::Public => "WECHAT-PUBLIC",
        }
    }
}

impl fmt::Display for WeixinLoginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a provider instance is bound to. Immutable per provider.
#[derive(Clone)]
pub struct ProviderContext {
    pub env: String,
    pub persistence: Persistence,
    pub cache: Arc<CredentialCache>,
    pub request: Arc<dyn RequestChannel>,
    pub runtime: Runtime,
    pub events: Arc<EventBus>,
    pub location: Arc<dyn Location>,
}

impl ProviderContext {
    /// `"1"` when running inside the hybrid miniprogram runtime.
    pub(crate) fn hybrid_miniapp_flag(&self) -> &'static str {
        if self.runtime == Runtime::MiniApp { "1" } else { "0" }
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("env", &self.env)
            .field("persistence", &self.persistence)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// Options for completing a sign-in redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectOptions {
    pub with_union_id: bool,
    pub sync_user_info: bool,
    pub create_user: bool,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            with_union_id: false,
            sync_user_info: false,
            create_user: true,
        }
    }
}

/// Options for completing a link redirect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOptions {
    pub with_union_id: bool,
}

/// Contract shared by credential mechanisms.
///
/// Redirect-based providers implement all three operations; other mechanisms
/// follow the same shape with their own exchange.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Leave the process for the provider's authorization page.
    fn sign_in_with_redirect(&self) -> SdkResult<()>;

    /// Complete a sign-in after the redirect came back.
    ///
    /// Returns `Ok(None)` when the current location is not a redirect return.
    async fn get_redirect_result(&self, options: RedirectOptions) -> SdkResult<Option<LoginState>>;

    /// Complete an identity link after the redirect came back.
    ///
    /// Returns `Ok(None)` when the current location is not a redirect return.
    async fn get_link_redirect_result(&self, options: LinkOptions) -> SdkResult<Option<Value>>;
}

/// Turn a response carrying a backend error code into an error.
pub(crate) fn check_response(action: &str, response: Value) -> SdkResult<Value> {
    if let Some(code) = response_code(&response) {
        return Err(SdkError::BackendRejected {
            action: action.to_string(),
            code,
            message: response_message(&response),
        });
    }
    Ok(response)
}

/// Fetch the current user's info and cache it.
pub async fn refresh_user_info(ctx: &ProviderContext) -> SdkResult<Value> {
    const ACTION: &str = "auth.getUserInfo";
    let info = check_response(ACTION, ctx.request.send(ACTION, json!({})).await?)?;
    ctx.cache
        .set_store_async(CacheSlot::UserInfo, info.to_string())
        .await?;
    Ok(info)
}

/// End the current session.
///
/// Tells the backend to drop the refresh token (failures are logged), clears
/// the credential slots and notifies listeners. No-op without a session.
pub async fn sign_out(ctx: &ProviderContext) -> SdkResult<()> {
    const ACTION: &str = "auth.logout";
    let _session = ctx.cache.session_guard().await;

    let Some(refresh_token) = ctx.cache.get_store(CacheSlot::RefreshToken)? else {
        tracing::debug!(env = %ctx.env, "sign out without a session");
        return Ok(());
    };

    let outcome = match ctx
        .request
        .send(ACTION, json!({ "refresh_token": refresh_token.expose() }))
        .await
    {
        Ok(response) => check_response(ACTION, response).map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        tracing::warn!(env = %ctx.env, "backend logout failed: {}", e);
    }

    ctx.cache.clear_credentials()?;
    ctx.cache.remove_store(CacheSlot::LoginType)?;
    ctx.events.fire(AuthEvent::LoginStateChanged);
    ctx.events.fire(AuthEvent::LoginTypeChanged {
        env: ctx.env.clone(),
        login_type: LoginType::Null,
        persistence: ctx.persistence,
    });
    tracing::info!(env = %ctx.env, "signed out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_type_classification() {
        assert_eq!(WeixinLoginType::from_scope("snsapi_login"), WeixinLoginType::Open);
        assert_eq!(WeixinLoginType::from_scope("snsapi_base"), WeixinLoginType::Public);
        assert_eq!(WeixinLoginType::from_scope("snsapi_userinfo"), WeixinLoginType::Public);
        assert_eq!(WeixinLoginType::from_scope(""), WeixinLoginType::Public);
        assert_eq!(WeixinLoginType::Open.as_str(), "WECHAT-OPEN");
        assert_eq!(WeixinLoginType::Public.as_str(), "WECHAT-PUBLIC");
    }

    #[test]
    fn test_login_type_parse() {
        for t in [
            LoginType::Wechat,
            LoginType::Anonymous,
            LoginType::Custom,
            LoginType::Email,
            LoginType::Username,
            LoginType::Null,
        ] {
            assert_eq!(LoginType::parse(t.as_str()), Some(t));
        }
        assert_eq!(LoginType::parse("PHONE"), None);
    }

    #[test]
    fn test_check_response() {
        let ok = check_response("a", json!({"refresh_token": "rt"}));
        assert!(ok.is_ok());

        let err = check_response("a", json!({"code": "DENIED", "message": "nope"})).unwrap_err();
        assert_eq!(err.backend_code(), Some("DENIED"));

        let err = check_response("a", json!({"code": 1001})).unwrap_err();
        assert_eq!(err.backend_code(), Some("1001"));
    }

    #[test]
    fn test_redirect_options_default_creates_user() {
        let options = RedirectOptions::default();
        assert!(options.create_user);
        assert!(!options.with_union_id);
        assert!(!options.sync_user_info);
    }
}
