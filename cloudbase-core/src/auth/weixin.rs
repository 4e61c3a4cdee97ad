//! WeChat redirect/OAuth provider.
//!
//! # Flow Overview
//!
//! 1. [`sign_in_with_redirect`](AuthProvider::sign_in_with_redirect) navigates
//!    to the WeChat authorization page; control leaves the process.
//! 2. WeChat redirects back with `code` (and `state`) on the return address.
//! 3. [`get_redirect_result`](AuthProvider::get_redirect_result), called on a
//!    cold start, reads the code from the location, exchanges it through the
//!    backend, writes the session to the cache, notifies listeners and returns
//!    a reconciled [`LoginState`].
//!
//! No in-memory state survives between steps 1 and 3.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::redirect::{AuthorizeRequest, extract_code, remove_param};
use super::{
    AuthProvider, LinkOptions, LoginState, LoginType, ProviderContext,
    RedirectOptions, SCOPE_BASE, SCOPE_OPEN_LOGIN, WeixinLoginType, check_response,
    refresh_user_info,
};
use crate::cache::{CacheSlot, Secret};
use crate::error::{DeprecationWarning, SdkError, SdkResult};
use crate::events::AuthEvent;

/// Authorization page for open-platform (QR code) login.
pub const OPEN_PLATFORM_AUTHORIZE_URL: &str = "https://open.weixin.qq.com/connect/qrconnect";
/// Authorization page for public-account login.
pub const PUBLIC_ACCOUNT_AUTHORIZE_URL: &str =
    "https://open.weixin.qq.com/connect/oauth2/authorize";

const DEFAULT_STATE: &str = "weixin";
const SIGN_IN_ACTION: &str = "auth.getJwt";
const LINK_ACTION: &str = "auth.linkWithWeixinCode";

/// Progress of the redirect flow on this provider instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectPhase {
    Idle,
    Redirecting,
    CodeReceived,
    Exchanging,
    SessionEstablished,
    Failed,
}

#[derive(Debug, Deserialize)]
struct JwtResponse {
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    access_token_expire: Option<i64>,
}

/// Tokens obtained from one code exchange.
struct ExchangedTokens {
    refresh_token: Secret,
    access_token: Option<Secret>,
    access_token_expire_ms: Option<i64>,
    received_at_ms: i64,
}

/// WeChat redirect provider.
pub struct WeixinAuthProvider {
    ctx: ProviderContext,
    appid: String,
    scope: String,
    state: String,
    phase: Mutex<RedirectPhase>,
}

impl WeixinAuthProvider {
    /// Create a provider. `state` defaults to `"weixin"`.
    pub fn new(
        ctx: ProviderContext,
        appid: impl Into<String>,
        scope: impl Into<String>,
        state: Option<String>,
    ) -> Self {
        Self {
            ctx,
            appid: appid.into(),
            scope: scope.into(),
            state: state.unwrap_or_else(|| DEFAULT_STATE.to_string()),
            phase: Mutex::new(RedirectPhase::Idle),
        }
    }

    pub fn appid(&self) -> &str {
        &self.appid
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    pub fn phase(&self) -> RedirectPhase {
        self.phase.lock().clone()
    }

    fn set_phase(&self, phase: RedirectPhase) {
        tracing::trace!(?phase, "redirect phase");
        *self.phase.lock() = phase;
    }

    /// Login type sent to the backend, derived from the configured scope.
    pub fn login_type(&self) -> WeixinLoginType {
        WeixinLoginType::from_scope(&self.scope)
    }

    /// Deprecated: use [`sign_in_with_redirect`](AuthProvider::sign_in_with_redirect).
    ///
    /// Performs no authentication and no I/O.
    #[deprecated(note = "use sign_in_with_redirect")]
    pub fn sign_in(&self) -> DeprecationWarning {
        let warning = DeprecationWarning::new(
            "API signIn has been deprecated, please use signInWithRedirect instead",
        );
        tracing::warn!("{}", warning);
        warning
    }

    /// The authorization URL for the current location.
    pub fn authorize_url(&self) -> SdkResult<String> {
        let current = self.ctx.location.href();
        let cleaned = remove_param(&remove_param(&current, "code"), "state");
        let host = if self.scope == SCOPE_OPEN_LOGIN {
            OPEN_PLATFORM_AUTHORIZE_URL
        } else {
            PUBLIC_ACCOUNT_AUTHORIZE_URL
        };
        AuthorizeRequest {
            host,
            appid: &self.appid,
            redirect_uri: &cleaned,
            scope: &self.scope,
            state: &self.state,
        }
        .to_url()
    }

    async fn sign_in_with_code(
        &self,
        code: &str,
        options: RedirectOptions,
    ) -> SdkResult<LoginState> {
        let ctx = &self.ctx;
        {
            // Held until listeners have run so they observe a complete session.
            let _session = ctx.cache.session_guard().await;

            self.set_phase(RedirectPhase::Exchanging);
            let tokens = self.exchange_code(code, options).await?;

            ctx.cache
                .set_store_async(CacheSlot::RefreshToken, tokens.refresh_token.expose())
                .await?;
            if let Some(access_token) = &tokens.access_token {
                ctx.cache
                    .set_store_async(CacheSlot::AccessToken, access_token.expose())
                    .await?;
            }
            if let Some(expire) = tokens.access_token_expire_ms {
                ctx.cache
                    .set_store_async(
                        CacheSlot::AccessTokenExpire,
                        (tokens.received_at_ms + expire).to_string(),
                    )
                    .await?;
            }

            ctx.events.fire(AuthEvent::LoginStateChanged);
            ctx.events.fire(AuthEvent::LoginTypeChanged {
                env: ctx.env.clone(),
                login_type: LoginType::Wechat,
                persistence: ctx.persistence,
            });

            // Recorded once listeners have seen the type change.
            ctx.cache
                .set_store_async(CacheSlot::LoginType, LoginType::Wechat.as_str())
                .await?;
        }

        if let Err(e) = refresh_user_info(ctx).await {
            tracing::warn!(env = %ctx.env, "failed to refresh user info after sign in: {}", e);
        }

        let mut login_state = LoginState::from_context(ctx);
        login_state.check_local_state_async().await;
        Ok(login_state)
    }

    async fn exchange_code(&self, code: &str, options: RedirectOptions) -> SdkResult<ExchangedTokens> {
        let sync_user_info = self.scope != SCOPE_BASE && options.sync_user_info;
        let payload = json!({
            "appid": self.appid,
            "loginType": self.login_type().as_str(),
            "hybridMiniapp": self.ctx.hybrid_miniapp_flag(),
            "syncUserInfo": sync_user_info,
            "loginCredential": code,
            "withUnionId": options.with_union_id,
            "createUser": options.create_user,
        });

        tracing::debug!(env = %self.ctx.env, login_type = %self.login_type(), "exchanging wechat code");
        let response = self.ctx.request.send(SIGN_IN_ACTION, payload).await?;
        let received_at_ms = Utc::now().timestamp_millis();

        let response = check_response(SIGN_IN_ACTION, response)?;
        let parsed: JwtResponse =
            serde_json::from_value(response).map_err(|e| SdkError::MalformedResponse {
                action: SIGN_IN_ACTION.to_string(),
                message: format!("undecodable response: {}", e),
            })?;

        let refresh_token = parsed
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SdkError::MalformedResponse {
                action: SIGN_IN_ACTION.to_string(),
                message: "not return refreshToken".to_string(),
            })?;

        Ok(ExchangedTokens {
            refresh_token: Secret::new(refresh_token),
            access_token: parsed
                .access_token
                .filter(|t| !t.is_empty())
                .map(Secret::new),
            access_token_expire_ms: parsed.access_token_expire.filter(|e| *e != 0),
            received_at_ms,
        })
    }
}

#[async_trait]
impl AuthProvider for WeixinAuthProvider {
    fn sign_in_with_redirect(&self) -> SdkResult<()> {
        let url = self.authorize_url()?;
        self.set_phase(RedirectPhase::Redirecting);
        tracing::info!(appid = %self.appid, scope = %self.scope, "redirecting to wechat authorization");

        self.ctx.location.assign(&url).map_err(|e| {
            self.set_phase(RedirectPhase::Failed);
            SdkError::Navigation {
                message: e.to_string(),
            }
        })
    }

    async fn get_redirect_result(&self, options: RedirectOptions) -> SdkResult<Option<LoginState>> {
        let Some(code) = extract_code(&self.ctx.location.href()) else {
            self.set_phase(RedirectPhase::Idle);
            return Ok(None);
        };
        self.set_phase(RedirectPhase::CodeReceived);

        match self.sign_in_with_code(&code, options).await {
            Ok(login_state) => {
                if login_state.is_logged_in() {
                    tracing::info!(env = %self.ctx.env, "wechat session established");
                    self.set_phase(RedirectPhase::SessionEstablished);
                } else {
                    tracing::warn!(
                        env = %self.ctx.env,
                        status = ?login_state.status(),
                        "wechat session written but reconciliation did not confirm it"
                    );
                    self.set_phase(RedirectPhase::Failed);
                }
                Ok(Some(login_state))
            }
            Err(e) => {
                tracing::warn!(env = %self.ctx.env, "wechat sign in failed: {}", e);
                self.set_phase(RedirectPhase::Failed);
                Err(e)
            }
        }
    }

    async fn get_link_redirect_result(&self, options: LinkOptions) -> SdkResult<Option<Value>> {
        let Some(code) = extract_code(&self.ctx.location.href()) else {
            return Ok(None);
        };

        let payload = json!({
            "payload": {
                "appid": self.appid,
                "loginType": self.login_type().as_str(),
                "code": code,
                "hybridMiniapp": self.ctx.hybrid_miniapp_flag(),
                "withUnionId": options.with_union_id,
            }
        });
        let response = self.ctx.request.send(LINK_ACTION, payload).await?;
        check_response(LINK_ACTION, response).map(Some)
    }
}

impl std::fmt::Debug for WeixinAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeixinAuthProvider")
            .field("appid", &self.appid)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .field("phase", &self.phase())
            .finish()
    }
}
