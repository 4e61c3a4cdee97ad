//! CLI configuration handling.

use anyhow::{Context, Result, bail};
use cloudbase_core::{InitOptions, Persistence, Runtime};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// CloudBase environment id.
    pub env: Option<String>,

    /// WeChat application id.
    pub appid: Option<String>,

    /// Authorization scope (`snsapi_login`, `snsapi_base`, `snsapi_userinfo`).
    pub scope: String,

    /// Address WeChat redirects back to.
    pub redirect_uri: Option<String>,

    /// Runtime reported to the backend.
    pub runtime: Runtime,

    pub persistence: Persistence,

    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,

    /// Backend endpoint override.
    pub endpoint: Option<String>,

    /// Required when `runtime` is not `web`.
    pub app_access_key_id: Option<String>,
    pub app_access_key: Option<String>,
    pub app_sign: Option<String>,

    /// File used for `local` persistence.
    pub data_path: Option<PathBuf>,

    /// Prefer the OS keyring for `local` persistence.
    pub use_keyring: bool,

    /// Logging level when neither `--verbose` nor `RUST_LOG` is set.
    pub log_level: String,

    /// Path of the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            env: None,
            appid: None,
            scope: "snsapi_login".to_string(),
            redirect_uri: None,
            runtime: Runtime::Web,
            persistence: Persistence::Local,
            timeout_ms: None,
            endpoint: None,
            app_access_key_id: None,
            app_access_key: None,
            app_sign: None,
            data_path: None,
            use_keyring: false,
            log_level: "warn".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    /// Init options for the configured env.
    pub fn init_options(&self) -> Result<InitOptions> {
        let Some(env) = self.env.as_deref().filter(|e| !e.is_empty()) else {
            bail!("no env configured; pass --env or set `env` in {:?}", self.config_path);
        };

        let mut options = InitOptions::new(env).with_persistence(self.persistence);
        if let Some(timeout) = self.timeout_ms {
            options = options.with_timeout(timeout);
        }
        if let (Some(id), Some(key)) = (&self.app_access_key_id, &self.app_access_key) {
            options = options.with_app_secret(id.as_str(), key.as_str());
        }
        if let Some(sign) = &self.app_sign {
            options = options.with_app_sign(sign.as_str());
        }
        Ok(options)
    }

    pub fn require_appid(&self) -> Result<&str> {
        self.appid
            .as_deref()
            .filter(|a| !a.is_empty())
            .context("no appid configured; pass --appid or set `appid` in the config file")
    }
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path;
    Ok(config)
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("cli.toml"))
        .unwrap_or_else(|| PathBuf::from("cloudbase-cli.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "cloudbase", "cloudbase")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cli.toml");

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.scope, "snsapi_login");
        assert_eq!(config.runtime, Runtime::Web);
        assert_eq!(config.persistence, Persistence::Local);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_parse_config_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cli.toml");
        std::fs::write(
            &path,
            r#"
env = "prod-env"
appid = "wx123"
scope = "snsapi_base"
runtime = "native"
persistence = "session"
timeout_ms = 5000
app_access_key_id = "id"
app_access_key = "key"
app_sign = "com.example.app"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.env.as_deref(), Some("prod-env"));
        assert_eq!(config.require_appid().unwrap(), "wx123");
        assert_eq!(config.runtime, Runtime::Native);
        assert_eq!(config.persistence, Persistence::Session);

        let options = config.init_options().unwrap();
        assert_eq!(options.env, "prod-env");
        assert_eq!(options.timeout, Some(5000));
        assert_eq!(options.app_sign.as_deref(), Some("com.example.app"));
        assert!(options.app_secret.is_some());
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cli.toml");
        std::fs::write(&path, "persistence = \"forever\"").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_init_options_require_env() {
        let config = CliConfig::default();
        assert!(config.init_options().is_err());
        assert!(config.require_appid().is_err());
    }
}
