use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

/// Clinic session probe - exercises the authenticated client against a clinic backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the clinic REST backend
    #[arg(short = 'u', long, env = "CLINIC_API_URL")]
    pub api_url: Option<String>,

    /// Access token to seed the session with
    #[arg(short = 't', long, env = "CLINIC_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Email to log in with (used when no token is given)
    #[arg(short = 'e', long, env = "CLINIC_EMAIL")]
    pub email: Option<String>,

    /// Password to log in with
    #[arg(long, env = "CLINIC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path to fetch; repeat to fire several requests concurrently
    #[arg(short = 'g', long = "get", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Token refresh timeout in seconds
    #[arg(long, env = "REFRESH_TIMEOUT", default_value = "15")]
    pub refresh_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,

    // Auth endpoints
    pub refresh_path: String,
    pub logout_path: String,
    pub login_path: String,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub refresh_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_LOGOUT_PATH: &str = "/auth/logout";
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";

impl Config {
    /// Defaults for everything except the backend URL
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            http_max_connections: 20,
            http_connect_timeout: 10,
            http_request_timeout: 30,
            refresh_timeout: 15,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }

    /// Build configuration with priority: CLI > ENV > defaults.
    /// Callers load `.env` before parsing `CliArgs` so its values count as ENV.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let api_base_url = args
            .api_url
            .clone()
            .context("CLINIC_API_URL is required (use -u or set CLINIC_API_URL env var)")?;

        let config = Config {
            refresh_path: env_or("AUTH_REFRESH_PATH", DEFAULT_REFRESH_PATH),
            logout_path: env_or("AUTH_LOGOUT_PATH", DEFAULT_LOGOUT_PATH),
            login_path: env_or("AUTH_LOGIN_PATH", DEFAULT_LOGIN_PATH),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,
            refresh_timeout: args.refresh_timeout,

            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),

            api_base_url,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.api_base_url)
            .with_context(|| format!("CLINIC_API_URL is not a valid URL: {}", self.api_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!(
                "CLINIC_API_URL must use http or https, got: {}",
                url.scheme()
            );
        }

        for (name, value) in [
            ("HTTP_CONNECT_TIMEOUT", self.http_connect_timeout),
            ("HTTP_REQUEST_TIMEOUT", self.http_request_timeout),
            ("REFRESH_TIMEOUT", self.refresh_timeout),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        for path in [&self.refresh_path, &self.logout_path, &self.login_path] {
            let absolute = path.starts_with("http://") || path.starts_with("https://");
            if !absolute && !path.starts_with('/') {
                anyhow::bail!(
                    "Auth endpoints must be a path starting with '/' or an absolute URL: {}",
                    path
                );
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
