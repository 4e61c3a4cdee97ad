//! CloudBase CLI
//!
//! Drives the WeChat redirect sign-in from a terminal. The browser leg is
//! done by hand: print the authorization URL, open it, then paste the
//! address WeChat redirected to.
//!
//! # Usage
//!
//! ```bash
//! # Print the WeChat authorization URL
//! cloudbase --env my-env authorize-url --appid wx123 --redirect-uri https://app.example.com/login
//!
//! # Complete the sign-in with the address WeChat redirected to
//! cloudbase --env my-env complete-redirect --appid wx123 'https://app.example.com/login?code=...&state=weixin'
//!
//! # Inspect or end the session
//! cloudbase --env my-env status
//! cloudbase --env my-env sign-out
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use cloudbase_core::{
    Adapter, AuthProvider, Cloudbase, EventBus, EventKind, LinkOptions, LoginState, LoginStatus,
    MemoryLocation, NativeAdapter, PlatformHandle, RedirectOptions, WeixinAuthProvider,
};

mod config;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "cloudbase")]
#[command(about = "WeChat sign-in for CloudBase environments")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CloudBase environment id
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the WeChat authorization URL
    AuthorizeUrl {
        /// WeChat application id
        #[arg(long)]
        appid: Option<String>,

        /// Authorization scope (e.g. snsapi_login, snsapi_base)
        #[arg(long)]
        scope: Option<String>,

        /// Address WeChat redirects back to
        #[arg(long)]
        redirect_uri: Option<String>,

        /// Opaque state echoed back by WeChat
        #[arg(long)]
        state: Option<String>,
    },

    /// Complete a sign-in (or identity link) from the redirect address
    CompleteRedirect {
        /// Address WeChat redirected to, including `code`
        url: String,

        /// WeChat application id
        #[arg(long)]
        appid: Option<String>,

        /// Authorization scope used for the redirect
        #[arg(long)]
        scope: Option<String>,

        /// Link the WeChat identity to the current user instead of signing in
        #[arg(long)]
        link: bool,

        /// Ask the backend to resolve the union id
        #[arg(long)]
        with_union_id: bool,

        /// Sync WeChat profile data into the user record
        #[arg(long)]
        sync_user_info: bool,

        /// Fail instead of creating a user for an unknown identity
        #[arg(long)]
        no_create_user: bool,
    },

    /// Show the current login state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a usable access token, refreshing it when needed
    Token,

    /// End the current session
    SignOut,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(env) = cli.env {
        config.env = Some(env);
    }

    init_logging(cli.verbose, &config.log_level);
    info!("Loaded configuration from {:?}", config.config_path);

    match cli.command {
        Commands::AuthorizeUrl { appid, scope, redirect_uri, state } => {
            authorize_url(config, appid, scope, redirect_uri, state)
        }
        Commands::CompleteRedirect {
            url,
            appid,
            scope,
            link,
            with_union_id,
            sync_user_info,
            no_create_user,
        } => {
            let options = RedirectOptions {
                with_union_id,
                sync_user_info,
                create_user: !no_create_user,
            };
            complete_redirect(config, &url, appid, scope, link, options).await
        }
        Commands::Status { format } => status(&config, &format).await,
        Commands::Token => token(&config).await,
        Commands::SignOut => sign_out(&config).await,
    }
}

fn init_logging(verbose: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { level })
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Configure a handle whose location is `location`.
fn build_app(config: &CliConfig, location: Arc<MemoryLocation>) -> Result<Cloudbase> {
    let mut adapter = NativeAdapter::new()
        .with_runtime(config.runtime)
        .with_keyring(config.use_keyring)
        .with_location(location);
    if let Some(path) = &config.data_path {
        adapter = adapter.with_data_path(path.clone());
    }

    let platform = Arc::new(PlatformHandle::new());
    platform.use_adapters([Arc::new(adapter) as Arc<dyn Adapter>]);

    let sdk = Cloudbase::with_context(platform, EventBus::global());
    if let Some(endpoint) = &config.endpoint {
        sdk.register_endpoint(endpoint, None);
    }
    sdk.init(config.init_options()?)
        .context("Failed to initialize cloudbase")
}

fn provider(
    app: &Cloudbase,
    config: &CliConfig,
    appid: Option<String>,
    scope: Option<String>,
    state: Option<String>,
) -> Result<WeixinAuthProvider> {
    let appid = match appid {
        Some(appid) => appid,
        None => config.require_appid()?.to_string(),
    };
    let scope = scope.unwrap_or_else(|| config.scope.clone());
    Ok(app.weixin_auth_provider(appid, scope, state)?)
}

fn authorize_url(
    config: CliConfig,
    appid: Option<String>,
    scope: Option<String>,
    redirect_uri: Option<String>,
    state: Option<String>,
) -> Result<()> {
    let redirect_uri = redirect_uri
        .or_else(|| config.redirect_uri.clone())
        .context("no redirect uri; pass --redirect-uri or set `redirect_uri` in the config file")?;

    let location = Arc::new(MemoryLocation::new(redirect_uri));
    let app = build_app(&config, location.clone())?;
    let provider = provider(&app, &config, appid, scope, state)?;

    provider.sign_in_with_redirect()?;
    let url = location
        .last_navigation()
        .context("sign in did not produce a navigation")?;

    println!("Open this URL in WeChat or a browser to authorize:");
    println!("{}", url);
    Ok(())
}

async fn complete_redirect(
    config: CliConfig,
    url: &str,
    appid: Option<String>,
    scope: Option<String>,
    link: bool,
    options: RedirectOptions,
) -> Result<()> {
    let location = Arc::new(MemoryLocation::new(url));
    let app = build_app(&config, location)?;
    let provider = provider(&app, &config, appid, scope, None)?;

    if link {
        let result = provider
            .get_link_redirect_result(LinkOptions {
                with_union_id: options.with_union_id,
            })
            .await?;
        match result {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("no authorization code in {}", url),
        }
        return Ok(());
    }

    let events = app.events().clone();
    let listener = events.subscribe(EventKind::LoginTypeChanged, |event| {
        info!(?event, "login type changed");
        Ok(())
    });
    let result = provider.get_redirect_result(options).await;
    events.unsubscribe(listener);

    match result? {
        Some(state) if state.is_logged_in() => {
            println!("Signed in to {}", state.env_id());
            Ok(())
        }
        Some(state) => bail!("sign in did not complete: {:?}", state.status()),
        None => bail!("no authorization code in {}", url),
    }
}

async fn status(config: &CliConfig, format: &str) -> Result<()> {
    let app = build_app(config, Arc::new(MemoryLocation::default()))?;
    let state = app.get_login_state().await?;

    match format {
        "json" => {
            let value = match &state {
                Some(state) => serde_json::json!({
                    "env": state.env_id(),
                    "status": status_label(state.status()),
                    "login_type": state.login_type().map(|t| t.as_str()),
                    "access_token_expire": state
                        .credential()
                        .access_token_expire
                        .map(|t| t.to_rfc3339()),
                }),
                None => serde_json::json!({ "status": "signed_out" }),
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => match &state {
            Some(state) => print_state(state),
            None => println!("Not signed in"),
        },
    }
    Ok(())
}

fn print_state(state: &LoginState) {
    println!("Environment: {}", state.env_id());
    println!("  Status: {}", status_label(state.status()));
    if let Some(login_type) = state.login_type() {
        println!("  Login type: {}", login_type);
    }
    if let Some(expire) = state.credential().access_token_expire {
        println!("  Access token expires: {}", expire.to_rfc3339());
    }
    if let LoginStatus::Failed(reason) = state.status() {
        println!("  Reason: {}", reason);
    }
}

fn status_label(status: &LoginStatus) -> &'static str {
    match status {
        LoginStatus::Unchecked => "unchecked",
        LoginStatus::Valid => "signed_in",
        LoginStatus::NoSession => "signed_out",
        LoginStatus::Expired => "expired",
        LoginStatus::Failed(_) => "failed",
    }
}

async fn token(config: &CliConfig) -> Result<()> {
    let app = build_app(config, Arc::new(MemoryLocation::default()))?;
    let mut state = LoginState::from_context(&app.provider_context()?);
    let token = state
        .get_access_token()
        .await
        .context("Failed to obtain an access token")?;
    println!("{}", token.expose());
    Ok(())
}

async fn sign_out(config: &CliConfig) -> Result<()> {
    let app = build_app(config, Arc::new(MemoryLocation::default()))?;
    app.sign_out().await?;
    println!("Signed out");
    Ok(())
}
