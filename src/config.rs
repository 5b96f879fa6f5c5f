//! Configuration loading and constants.
//!
//! Loads the declarative server configuration from TOML files and defines
//! constants for HSTS, cache headers, body buffering, and default paths.
//! `ServerConfig` is the root configuration struct; it is loaded exactly once
//! at startup and treated as immutable afterwards. Unknown keys are ignored
//! and missing optional fields fall back to documented defaults.

use clap::Parser;
use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

use crate::routing::Access;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "groundwork=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

// =============================================================================
// HTTPS enforcement
// =============================================================================

/// HSTS max-age in seconds (366 days)
pub const HSTS_MAX_AGE_SECS: u32 = 31_622_400;

/// Pre-formatted Strict-Transport-Security value sent on every TLS response
pub const STRICT_TRANSPORT_SECURITY_VALUE: &str =
    formatcp!("max-age={}; preload", HSTS_MAX_AGE_SECS);

/// Path prefix under which ACME HTTP-01 challenge responses are served
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

// =============================================================================
// Static assets
// =============================================================================

/// Static assets (CSS, JS) - long cache with immutable hint
pub const HTTP_CACHE_STATIC_MAX_AGE: u32 = 86400;

pub const CACHE_CONTROL_STATIC: &str =
    formatcp!("public, max-age={}, immutable", HTTP_CACHE_STATIC_MAX_AGE);

// =============================================================================
// Pipeline limits
// =============================================================================

/// Upper bound on request bodies buffered for failure-hook re-reads.
/// Larger bodies are rejected with 413 before any stage runs.
pub const MAX_BUFFERED_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Graceful shutdown drain deadline in seconds
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Maximum number of live sessions held by the in-process session store
pub const MAX_SESSIONS: u64 = 100_000;

/// Command line arguments for applications hosted on this bootstrap layer.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct HostArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Log level filter (e.g., "groundwork=debug,tower_http=info")
    #[arg(short, long)]
    pub log_level: Option<String>,
}

/// Root configuration for a hosted server application.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Render detailed diagnostics instead of invoking the recovery hook
    #[serde(default)]
    pub use_developer_error_page: bool,
    /// HTTP/HTTPS listener configuration
    pub http: HttpConfig,
    /// Routing, session and frontend configuration
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and TLS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub https_enabled: bool,
    #[serde(default = "HttpConfig::default_http_port")]
    pub http_port: u16,
    #[serde(default = "HttpConfig::default_https_port")]
    pub https_port: u16,
    /// Public domain used for certificate issuance and HTTPS redirects
    #[serde(default)]
    pub main_domain: String,
    /// Additional domains included on the certificate
    #[serde(default)]
    pub alternative_domains: Vec<String>,
    /// Certificate signing request details
    #[serde(default)]
    pub csr_info: CsrInfo,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl HttpConfig {
    fn default_http_port() -> u16 {
        80
    }

    fn default_https_port() -> u16 {
        443
    }

    /// The main domain followed by all alternative domains, in order.
    pub fn all_domains(&self) -> Vec<String> {
        let mut domains = Vec::with_capacity(1 + self.alternative_domains.len());
        domains.push(self.main_domain.clone());
        domains.extend(self.alternative_domains.iter().cloned());
        domains
    }
}

/// Certificate signing request details forwarded to the issuance collaborator
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsrInfo {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub email: String,
}

/// TLS certificate acquisition mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Automatic certificates via ACME (Let's Encrypt)
    #[default]
    Acme,
    /// User-provided certificate and key files
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub mode: TlsMode,
    /// Directory for cached ACME account and certificate material
    #[serde(default = "TlsConfig::default_acme_cache_dir")]
    pub acme_cache_dir: String,
    /// Use the Let's Encrypt production directory (staging when false)
    #[serde(default)]
    pub acme_production: bool,
    /// PEM certificate chain path (manual mode)
    pub cert_path: Option<String>,
    /// PEM private key path (manual mode)
    pub key_path: Option<String>,
}

impl TlsConfig {
    fn default_acme_cache_dir() -> String {
        "acme-cache".to_string()
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: TlsMode::default(),
            acme_cache_dir: Self::default_acme_cache_dir(),
            acme_production: false,
            cert_path: None,
            key_path: None,
        }
    }
}

/// Routing, session and frontend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Enables the static file and session stages
    #[serde(default)]
    pub is_frontend: bool,
    /// Sessions idle out of the store after this many minutes
    #[serde(default = "ControllerConfig::default_session_idle_timeout")]
    pub session_idle_timeout_minutes: u32,
    /// Map the convention route patterns; when false only explicitly routed
    /// actions are reachable
    #[serde(default = "ControllerConfig::default_use_default_routes")]
    pub use_default_routes: bool,
    #[serde(default)]
    pub additional_routes: Vec<RoutePatternConfig>,
    /// Directory served under /static when is_frontend is set
    #[serde(default = "ControllerConfig::default_static_dir")]
    pub static_dir: String,
    /// Secret for the private session cookie jar; a per-process random secret
    /// is used when absent, so sessions then do not survive restarts
    pub cookie_secret: Option<String>,
}

impl ControllerConfig {
    fn default_session_idle_timeout() -> u32 {
        20
    }

    fn default_use_default_routes() -> bool {
        true
    }

    fn default_static_dir() -> String {
        "static".to_string()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            is_frontend: false,
            session_idle_timeout_minutes: Self::default_session_idle_timeout(),
            use_default_routes: Self::default_use_default_routes(),
            additional_routes: Vec::new(),
            static_dir: Self::default_static_dir(),
            cookie_secret: None,
        }
    }
}

/// A configured route pattern mapping a URL shape onto a controller action
#[derive(Debug, Clone, Deserialize)]
pub struct RoutePatternConfig {
    /// Route name (used for logging and identification)
    pub name: String,
    /// Pattern with literal segments and {controller}/{action} placeholders
    pub pattern: String,
    /// Controller used when the pattern has no {controller} placeholder
    #[serde(default)]
    pub default_controller: String,
    /// Action used when the pattern has no {action} placeholder or the
    /// request omits the trailing action segment
    #[serde(default = "RoutePatternConfig::default_action")]
    pub default_action: String,
    /// Access requirement overriding the action's own policy
    pub access: Option<Access>,
}

impl RoutePatternConfig {
    fn default_action() -> String {
        "index".to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for contradictions that must abort startup
    /// before any socket is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.https_enabled {
            if self.http.main_domain.is_empty() {
                return Err(ConfigError::Validation(
                    "http.main_domain is required when HTTPS is enabled".to_string(),
                ));
            }
            if self.http.csr_info.email.is_empty() {
                return Err(ConfigError::Validation(
                    "http.csr_info.email is required for certificate issuance".to_string(),
                ));
            }
            if self.http.tls.mode == TlsMode::Manual
                && (self.http.tls.cert_path.is_none() || self.http.tls.key_path.is_none())
            {
                return Err(ConfigError::Validation(
                    "http.tls.cert_path and http.tls.key_path are required in manual TLS mode"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> ServerConfig {
        toml::from_str(toml).expect("config should parse")
    }

    #[test]
    fn minimal_config_uses_documented_defaults() {
        let config = parse("[http]\n");
        assert!(!config.http.https_enabled);
        assert_eq!(config.http.http_port, 80);
        assert_eq!(config.http.https_port, 443);
        assert!(!config.controller.is_frontend);
        assert_eq!(config.controller.session_idle_timeout_minutes, 20);
        assert!(config.controller.use_default_routes);
        assert!(config.controller.additional_routes.is_empty());
        assert_eq!(config.http.tls.mode, TlsMode::Acme);
        assert!(!config.use_developer_error_page);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = parse(
            r#"
            some_future_flag = true
            [http]
            http_port = 8080
            shiny = "yes"
            "#,
        );
        assert_eq!(config.http.http_port, 8080);
    }

    #[test]
    fn https_requires_main_domain_and_email() {
        let config = parse(
            r#"
            [http]
            https_enabled = true
            main_domain = "example.com"
            "#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let config = parse(
            r#"
            [http]
            https_enabled = true
            main_domain = "example.com"
            [http.csr_info]
            email = "admin@example.com"
            "#,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn manual_tls_requires_certificate_paths() {
        let config = parse(
            r#"
            [http]
            https_enabled = true
            main_domain = "example.com"
            [http.csr_info]
            email = "admin@example.com"
            [http.tls]
            mode = "manual"
            "#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn additional_routes_parse_with_access_override() {
        let config = parse(
            r#"
            [http]
            [[controller.additional_routes]]
            name = "admin"
            pattern = "/admin/{action}"
            default_controller = "admin"
            access = "authenticated"
            "#,
        );
        let route = &config.controller.additional_routes[0];
        assert_eq!(route.name, "admin");
        assert_eq!(route.default_action, "index");
        assert_eq!(route.access, Some(Access::Authenticated));
    }

    #[test]
    fn all_domains_keeps_main_domain_first() {
        let config = parse(
            r#"
            [http]
            main_domain = "example.com"
            alternative_domains = ["www.example.com"]
            "#,
        );
        assert_eq!(
            config.http.all_domains(),
            vec!["example.com".to_string(), "www.example.com".to_string()]
        );
    }
}
