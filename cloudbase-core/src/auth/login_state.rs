//! Reconciled login state.
//!
//! A [`LoginState`] is a snapshot, not a cache: it is rebuilt from the
//! credential cache and confirmed with the backend when the cached access
//! token is missing or expired. Reconciliation never fails; its outcome is
//! recorded in [`LoginStatus`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{LoginType, ProviderContext, check_response};
use crate::cache::{CacheSlot, CredentialCache, Secret};
use crate::error::{SdkError, SdkResult};
use crate::events::{AuthEvent, EventBus};
use crate::request::RequestChannel;

const REFRESH_ACTION: &str = "auth.fetchAccessTokenWithRefreshToken";

/// Backend codes meaning the refresh token can never be used again.
const REFRESH_TOKEN_REVOKED_CODES: [&str; 3] = [
    "SIGN_PARAM_INVALID",
    "REFRESH_TOKEN_EXPIRED",
    "INVALID_REFRESH_TOKEN",
];

/// Outcome of the last reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    /// Not reconciled yet.
    Unchecked,
    /// A usable session exists.
    Valid,
    /// No refresh token is cached.
    NoSession,
    /// The backend refused the refresh token; the session was cleared.
    Expired,
    /// Reconciliation could not complete (network, storage, protocol).
    Failed(String),
}

/// Credentials as last read from the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub refresh_token: Option<Secret>,
    pub access_token: Option<Secret>,
    pub access_token_expire: Option<DateTime<Utc>>,
}

impl Credential {
    fn has_usable_access_token(&self) -> bool {
        match (&self.access_token, self.access_token_expire) {
            (Some(_), Some(expire)) => expire > Utc::now(),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    access_token_expire: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Snapshot of the current authentication status of one env.
pub struct LoginState {
    env_id: String,
    cache: Arc<CredentialCache>,
    request: Arc<dyn RequestChannel>,
    events: Arc<EventBus>,
    credential: Credential,
    status: LoginStatus,
}

impl LoginState {
    pub fn new(
        env_id: impl Into<String>,
        cache: Arc<CredentialCache>,
        request: Arc<dyn RequestChannel>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            env_id: env_id.into(),
            cache,
            request,
            events,
            credential: Credential::default(),
            status: LoginStatus::Unchecked,
        }
    }

    pub fn from_context(ctx: &ProviderContext) -> Self {
        Self::new(
            ctx.env.clone(),
            ctx.cache.clone(),
            ctx.request.clone(),
            ctx.events.clone(),
        )
    }

    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    pub fn status(&self) -> &LoginStatus {
        &self.status
    }

    pub fn is_logged_in(&self) -> bool {
        self.status == LoginStatus::Valid
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn refresh_token(&self) -> Option<&Secret> {
        self.credential.refresh_token.as_ref()
    }

    pub fn access_token(&self) -> Option<&Secret> {
        self.credential.access_token.as_ref()
    }

    /// Login type recorded in the cache.
    pub fn login_type(&self) -> Option<LoginType> {
        self.cache
            .get_store(CacheSlot::LoginType)
            .ok()
            .flatten()
            .and_then(|value| LoginType::parse(value.expose()))
    }

    /// Cached user info, if any was fetched.
    pub fn user_info(&self) -> Option<Value> {
        self.cache
            .get_store(CacheSlot::UserInfo)
            .ok()
            .flatten()
            .and_then(|value| serde_json::from_str(value.expose()).ok())
    }

    /// Reconcile with the cache and, when needed, the backend.
    pub async fn check_local_state_async(&mut self) {
        self.status = match self.reconcile().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(env = %self.env_id, "login state reconciliation failed: {}", e);
                LoginStatus::Failed(e.to_string())
            }
        };
        tracing::debug!(env = %self.env_id, status = ?self.status, "login state reconciled");
    }

    /// A usable access token, minted from the refresh token when needed.
    pub async fn get_access_token(&mut self) -> SdkResult<Secret> {
        self.credential = self.read_credential()?;
        let Some(refresh_token) = self.credential.refresh_token.clone() else {
            self.status = LoginStatus::NoSession;
            return Err(SdkError::invalid_operation("not logged in"));
        };

        if !self.credential.has_usable_access_token() {
            if let Err(e) = self.refresh_access_token(&refresh_token).await {
                self.status = self.handle_refresh_error(&e)?;
                return Err(e);
            }
        }

        self.status = LoginStatus::Valid;
        self.credential
            .access_token
            .clone()
            .ok_or_else(|| SdkError::Unknown {
                message: "access token missing after refresh".to_string(),
            })
    }

    async fn reconcile(&mut self) -> SdkResult<LoginStatus> {
        self.credential = self.read_credential()?;

        let Some(refresh_token) = self.credential.refresh_token.clone() else {
            return Ok(LoginStatus::NoSession);
        };
        if self.credential.has_usable_access_token() {
            return Ok(LoginStatus::Valid);
        }

        match self.refresh_access_token(&refresh_token).await {
            Ok(()) => Ok(LoginStatus::Valid),
            Err(e) => self.handle_refresh_error(&e),
        }
    }

    /// Clear the session when the backend revoked the refresh token.
    ///
    /// Returns `Expired` in that case and `Failed` for everything else.
    fn handle_refresh_error(&mut self, e: &SdkError) -> SdkResult<LoginStatus> {
        match e.backend_code() {
            Some(code) if REFRESH_TOKEN_REVOKED_CODES.contains(&code) => {
                self.cache.clear_credentials()?;
                self.credential = Credential::default();
                tracing::info!(env = %self.env_id, code, "refresh token revoked, session expired");
                self.events.fire(AuthEvent::LoginStateExpired {
                    env: self.env_id.clone(),
                });
                Ok(LoginStatus::Expired)
            }
            _ => Ok(LoginStatus::Failed(e.to_string())),
        }
    }

    fn read_credential(&self) -> SdkResult<Credential> {
        let access_token_expire = self
            .cache
            .get_store(CacheSlot::AccessTokenExpire)?
            .and_then(|value| value.expose().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);
        Ok(Credential {
            refresh_token: self.cache.get_store(CacheSlot::RefreshToken)?,
            access_token: self.cache.get_store(CacheSlot::AccessToken)?,
            access_token_expire,
        })
    }

    async fn refresh_access_token(&mut self, refresh_token: &Secret) -> SdkResult<()> {
        let response = self
            .request
            .send(
                REFRESH_ACTION,
                json!({ "refresh_token": refresh_token.expose() }),
            )
            .await?;
        let received_at_ms = Utc::now().timestamp_millis();

        let response = check_response(REFRESH_ACTION, response)?;
        let parsed: RefreshResponse =
            serde_json::from_value(response).map_err(|e| SdkError::MalformedResponse {
                action: REFRESH_ACTION.to_string(),
                message: format!("undecodable response: {}", e),
            })?;
        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SdkError::MalformedResponse {
                action: REFRESH_ACTION.to_string(),
                message: "not return accessToken".to_string(),
            })?;

        {
            let _session = self.cache.session_guard().await;
            if let Some(rotated) = parsed.refresh_token.as_deref().filter(|t| !t.is_empty()) {
                self.cache
                    .set_store_async(CacheSlot::RefreshToken, rotated)
                    .await?;
            }
            self.cache
                .set_store_async(CacheSlot::AccessToken, access_token.as_str())
                .await?;
            if let Some(expire) = parsed.access_token_expire.filter(|e| *e != 0) {
                self.cache
                    .set_store_async(
                        CacheSlot::AccessTokenExpire,
                        (received_at_ms + expire).to_string(),
                    )
                    .await?;
            } else {
                self.cache.remove_store(CacheSlot::AccessTokenExpire)?;
            }
            self.events.fire(AuthEvent::AccessTokenRefreshed {
                env: self.env_id.clone(),
            });
        }

        self.credential = self.read_credential()?;
        tracing::debug!(env = %self.env_id, "access token refreshed");
        Ok(())
    }
}

impl std::fmt::Debug for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginState")
            .field("env_id", &self.env_id)
            .field("status", &self.status)
            .field("credential", &self.credential)
            .finish()
    }
}
