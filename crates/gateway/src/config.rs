//! Gateway configuration

use std::env;
use std::time::Duration;

use axum::http::StatusCode;

/// Reserved root domains for each zone
#[derive(Debug, Clone)]
pub struct ZoneHosts {
    /// Short URL zone root (suffix match)
    pub url: String,
    /// App zone root (suffix match)
    pub app: String,
    /// Function zone root (suffix match)
    pub function: String,
    /// Email verification host (exact match)
    pub user: String,
    /// Community host (exact match)
    pub community: String,
    /// Company root stripped from the community host to get its app identifier
    pub com: String,
}

impl Default for ZoneHosts {
    fn default() -> Self {
        Self {
            url: "m3o.one".to_string(),
            app: "m3o.app".to_string(),
            function: "m3o.sh".to_string(),
            user: "user.m3o.com".to_string(),
            community: "community.m3o.com".to_string(),
            com: "m3o.com".to_string(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Resolution API
    pub resolver_api_url: String,
    pub resolver_api_key: Option<String>,
    pub resolve_timeout: Duration,

    // Zones
    pub zones: ZoneHosts,

    // Dispatch
    pub cache_freshness: Duration,
    pub url_redirect_status: StatusCode,
    pub not_handled_status: StatusCode,

    // Forwarding
    pub forward_timeout: Duration,
    pub forward_connect_timeout: Duration,

    // Logging
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            resolver_api_url: "https://api.m3o.com".to_string(),
            resolver_api_key: None,
            resolve_timeout: Duration::from_millis(10_000),
            zones: ZoneHosts::default(),
            cache_freshness: crate::routing::DEFAULT_FRESHNESS,
            url_redirect_status: StatusCode::FOUND,
            not_handled_status: StatusCode::NOT_FOUND,
            forward_timeout: Duration::from_millis(30_000),
            forward_connect_timeout: Duration::from_millis(5_000),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let resolver_api_url = env::var("RESOLVER_API_URL")
            .unwrap_or(defaults.resolver_api_url)
            .trim_end_matches('/')
            .to_string();
        if url::Url::parse(&resolver_api_url).is_err() {
            return Err(ConfigError::Invalid("RESOLVER_API_URL", resolver_api_url));
        }

        let url_redirect_status = parse_status("URL_REDIRECT_STATUS", defaults.url_redirect_status)?;
        if !url_redirect_status.is_redirection() {
            return Err(ConfigError::Invalid(
                "URL_REDIRECT_STATUS",
                url_redirect_status.as_u16().to_string(),
            ));
        }

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") | Err(_) => LogFormat::Pretty,
            Ok(other) => return Err(ConfigError::Invalid("LOG_FORMAT", other.to_string())),
        };

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),

            // Resolution API
            resolver_api_url,
            // Empty key means anonymous calls
            resolver_api_key: env::var("RESOLVER_API_KEY").ok().filter(|k| !k.is_empty()),
            resolve_timeout: parse_millis("RESOLVE_TIMEOUT_MS", defaults.resolve_timeout)?,

            // Zones
            zones: ZoneHosts {
                url: host_var("URL_HOST", defaults.zones.url),
                app: host_var("APP_HOST", defaults.zones.app),
                function: host_var("FUNCTION_HOST", defaults.zones.function),
                user: host_var("USER_HOST", defaults.zones.user),
                community: host_var("COMMUNITY_HOST", defaults.zones.community),
                com: host_var("COM_HOST", defaults.zones.com),
            },

            // Dispatch
            cache_freshness: match env::var("CACHE_FRESHNESS_SECS") {
                Ok(raw) => Duration::from_secs(
                    raw.parse()
                        .map_err(|_| ConfigError::Invalid("CACHE_FRESHNESS_SECS", raw))?,
                ),
                Err(_) => defaults.cache_freshness,
            },
            url_redirect_status,
            not_handled_status: parse_status("NOT_HANDLED_STATUS", defaults.not_handled_status)?,

            // Forwarding
            forward_timeout: parse_millis("FORWARD_TIMEOUT_MS", defaults.forward_timeout)?,
            forward_connect_timeout: parse_millis(
                "FORWARD_CONNECT_TIMEOUT_MS",
                defaults.forward_connect_timeout,
            )?,

            log_format,
        })
    }
}

fn host_var(key: &'static str, default: String) -> String {
    env::var(key)
        .map(|v| v.trim().to_lowercase())
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_status(key: &'static str, default: StatusCode) -> Result<StatusCode, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or(ConfigError::Invalid(key, raw)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
