//! SDK configuration: caller options, defaults and the resolved snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{SdkError, SdkResult};
use crate::platform::Runtime;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
/// Lower bound for the request timeout.
pub const MIN_TIMEOUT_MS: u64 = 100;
/// Upper bound for the request timeout (10 minutes).
pub const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Default backend endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://tcb-api.tencentcloudapi.com/web";
/// SDK version reported to the backend unless overridden.
pub const DEFAULT_SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cache durability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    /// Survives for the lifetime of the host process.
    #[default]
    Session,
    /// Survives process restarts.
    Local,
    /// Lives only as long as the provisioned cache.
    None,
}

impl Persistence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Local => "local",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Persistence {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "local" => Ok(Self::Local),
            "none" => Ok(Self::None),
            other => Err(SdkError::invalid_params(format!(
                "invalid persistence: {other}"
            ))),
        }
    }
}

/// Application credentials required on non-web runtimes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSecret {
    pub app_access_key_id: String,
    pub app_access_key: String,
}

impl fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSecret")
            .field("app_access_key_id", &self.app_access_key_id)
            .field("app_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Options passed to [`Cloudbase::init`](crate::Cloudbase::init).
///
/// Omitted fields take their defaults; supplied ones are kept as given
/// (subject to timeout clamping).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitOptions {
    pub env: String,
    pub timeout: Option<u64>,
    pub persistence: Option<Persistence>,
    pub app_secret: Option<AppSecret>,
    pub app_sign: Option<String>,
    pub debug: Option<bool>,
}

impl InitOptions {
    pub fn new(env: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_app_secret(
        mut self,
        key_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.app_secret = Some(AppSecret {
            app_access_key_id: key_id.into(),
            app_access_key: key.into(),
        });
        self
    }

    pub fn with_app_sign(mut self, app_sign: impl Into<String>) -> Self {
        self.app_sign = Some(app_sign.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }
}

/// Fields that may change after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub persistence: Persistence,
    pub debug: bool,
}

/// Resolved configuration snapshot of an initialized SDK handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    pub env: String,
    pub timeout_ms: u64,
    pub persistence: Persistence,
    pub app_secret: Option<AppSecret>,
    pub app_sign: Option<String>,
    pub debug: bool,
    pub endpoint: String,
    pub sdk_version: String,
}

impl SdkConfig {
    /// Validate caller options against the active runtime and apply defaults.
    ///
    /// `adapter_sign` is the signature reported by the runtime adapter, if any.
    pub fn resolve(
        options: InitOptions,
        runtime: Runtime,
        adapter_sign: Option<String>,
    ) -> SdkResult<Self> {
        if options.env.trim().is_empty() {
            return Err(SdkError::invalid_params("invalid env"));
        }

        let mut app_sign = options.app_sign.filter(|s| !s.is_empty());
        if runtime != Runtime::Web {
            if options.app_secret.is_none() {
                return Err(SdkError::invalid_params("invalid appSecret"));
            }
            let adapter_sign = adapter_sign.filter(|s| !s.is_empty());
            if let (Some(given), Some(reported)) = (&app_sign, &adapter_sign) {
                if given != reported {
                    return Err(SdkError::invalid_params("invalid appSign"));
                }
            }
            if adapter_sign.is_some() {
                app_sign = adapter_sign;
            }
            if app_sign.is_none() {
                return Err(SdkError::invalid_params("invalid appSign"));
            }
        }

        Ok(Self {
            env: options.env,
            timeout_ms: clamp_timeout(options.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)),
            persistence: options.persistence.unwrap_or_default(),
            app_secret: options.app_secret,
            app_sign,
            debug: options.debug.unwrap_or(false),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sdk_version: DEFAULT_SDK_VERSION.to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Clamp a timeout into `[MIN_TIMEOUT_MS, MAX_TIMEOUT_MS]`, warning on clamp.
pub fn clamp_timeout(timeout_ms: u64) -> u64 {
    if timeout_ms > MAX_TIMEOUT_MS {
        tracing::warn!(
            timeout_ms,
            "[cloudbase][INVALID_PARAMS] timeout is greater than maximum value[10min]"
        );
        MAX_TIMEOUT_MS
    } else if timeout_ms < MIN_TIMEOUT_MS {
        tracing::warn!(
            timeout_ms,
            "[cloudbase][INVALID_PARAMS] timeout is less than minimum value[100ms]"
        );
        MIN_TIMEOUT_MS
    } else {
        timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_clamp_timeout() {
        assert_eq!(clamp_timeout(0), MIN_TIMEOUT_MS);
        assert_eq!(clamp_timeout(99), MIN_TIMEOUT_MS);
        assert_eq!(clamp_timeout(100), 100);
        assert_eq!(clamp_timeout(15_000), 15_000);
        assert_eq!(clamp_timeout(600_000), 600_000);
        assert_eq!(clamp_timeout(600_001), MAX_TIMEOUT_MS);
        assert_eq!(clamp_timeout(u64::MAX), MAX_TIMEOUT_MS);
    }

    #[test]
    fn test_defaults_apply_only_to_omitted_fields() {
        let config = SdkConfig::resolve(InitOptions::new("env-1"), Runtime::Web, None).unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.persistence, Persistence::Session);
        assert!(!config.debug);

        let config = SdkConfig::resolve(
            InitOptions::new("env-1")
                .with_timeout(3_000)
                .with_persistence(Persistence::None),
            Runtime::Web,
            None,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 3_000);
        assert_eq!(config.persistence, Persistence::None);
    }

    #[test]
    fn test_empty_env_is_rejected() {
        let err = SdkConfig::resolve(InitOptions::new("  "), Runtime::Web, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }

    #[test]
    fn test_web_runtime_needs_no_secret() {
        assert!(SdkConfig::resolve(InitOptions::new("env"), Runtime::Web, None).is_ok());
    }

    #[test]
    fn test_non_web_requires_app_secret() {
        let err = SdkConfig::resolve(
            InitOptions::new("env").with_app_sign("sign"),
            Runtime::Native,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid appSecret"));
    }

    #[test]
    fn test_non_web_app_sign_rules() {
        let base = InitOptions::new("env").with_app_secret("id", "key");

        let err = SdkConfig::resolve(base.clone(), Runtime::MiniApp, None).unwrap_err();
        assert!(err.to_string().contains("invalid appSign"));

        let err = SdkConfig::resolve(
            base.clone().with_app_sign("mine"),
            Runtime::MiniApp,
            Some("theirs".to_string()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);

        let config =
            SdkConfig::resolve(base.clone(), Runtime::MiniApp, Some("adapter".to_string()))
                .unwrap();
        assert_eq!(config.app_sign.as_deref(), Some("adapter"));

        let config = SdkConfig::resolve(base.with_app_sign("mine"), Runtime::Native, None).unwrap();
        assert_eq!(config.app_sign.as_deref(), Some("mine"));
    }

    #[test]
    fn test_persistence_parse() {
        assert_eq!("local".parse::<Persistence>().unwrap(), Persistence::Local);
        assert!("forever".parse::<Persistence>().is_err());
    }

    #[test]
    fn test_app_secret_debug_redacted() {
        let secret = AppSecret {
            app_access_key_id: "id".to_string(),
            app_access_key: "very-secret".to_string(),
        };
        assert!(!format!("{:?}", secret).contains("very-secret"));
    }
}
