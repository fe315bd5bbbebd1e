//! Gateway configuration

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mcpmux_shared::{parse_backend_list, BackendDescriptor, DescriptorError};

use crate::moderation::DEFAULT_CLASSIFIER_URL;

const DEFAULT_BACKENDS_FILE: &str = "mcpmux.json";

/// Moderation and negotiation settings shared by the orchestrator and registry
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub moderation_enabled: bool,
    pub moderation_api_key: Option<String>,
    pub moderation_url: String,
    /// Bound on each transport attempt while connecting a backend
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            moderation_enabled: false,
            moderation_api_key: None,
            moderation_url: DEFAULT_CLASSIFIER_URL.to_string(),
            connect_timeout: Duration::from_millis(30_000),
        }
    }
}

impl GatewayConfig {
    /// Moderation cannot be enabled without a credential
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_key = self
            .moderation_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());

        if self.moderation_enabled && !has_key {
            return Err(ConfigError::ModerationCredentialMissing);
        }
        Ok(())
    }
}

/// Which frontend serves the aggregate endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendTransport {
    Stdio,
    Http,
}

impl FromStr for FrontendTransport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(FrontendTransport::Stdio),
            "http" => Ok(FrontendTransport::Http),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `MCPMUX_LOG_FORMAT` on its own so logging can start before the
    /// rest of the config is loaded. Unset or unrecognized means pretty;
    /// [`Config::from_env`] still rejects an unrecognized value.
    pub fn from_env() -> Self {
        parse_enum("MCPMUX_LOG_FORMAT", LogFormat::Pretty).unwrap_or(LogFormat::Pretty)
    }
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub backends: Vec<BackendDescriptor>,

    // Frontend
    pub transport: FrontendTransport,
    pub bind_address: String,

    // Logging
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let gateway = GatewayConfig {
            moderation_enabled: parse_bool("MCPMUX_MODERATION_ENABLED", false)?,
            moderation_api_key: env::var("MCPMUX_MODERATION_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            moderation_url: env::var("MCPMUX_MODERATION_URL")
                .unwrap_or_else(|_| DEFAULT_CLASSIFIER_URL.to_string()),
            connect_timeout: Duration::from_millis(parse_number(
                "MCPMUX_CONNECT_TIMEOUT_MS",
                30_000,
            )?),
        };

        // Fatal before anything else is loaded or connected
        gateway.validate()?;

        Ok(Self {
            gateway,
            backends: load_backends()?,

            // Frontend
            transport: parse_enum("MCPMUX_TRANSPORT", FrontendTransport::Stdio)?,
            bind_address: env::var("MCPMUX_BIND_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string()),

            // Logging
            log_format: parse_enum("MCPMUX_LOG_FORMAT", LogFormat::Pretty)?,
        })
    }
}

/// Backend list from `MCPMUX_BACKENDS`, else from `MCPMUX_BACKENDS_FILE`.
///
/// A missing default file means "no backends"; a missing file that was named
/// explicitly is an error.
fn load_backends() -> Result<Vec<BackendDescriptor>, ConfigError> {
    if let Ok(inline) = env::var("MCPMUX_BACKENDS") {
        return Ok(parse_backend_list(&inline)?);
    }

    let (path, explicit) = match env::var("MCPMUX_BACKENDS_FILE") {
        Ok(path) => (PathBuf::from(path), true),
        Err(_) => (PathBuf::from(DEFAULT_BACKENDS_FILE), false),
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(parse_backend_list(&contents)?),
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "No backend list found, starting with built-ins only");
            Ok(Vec::new())
        }
        Err(source) => Err(ConfigError::BackendsFile { path, source }),
    }
}

fn parse_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}

fn parse_number(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn parse_enum<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Configuration errors. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("Moderation is enabled but MCPMUX_MODERATION_API_KEY is not set")]
    ModerationCredentialMissing,
    #[error("Invalid backend list: {0}")]
    Backends(#[from] DescriptorError),
    #[error("Cannot read backend list {}: {source}", .path.display())]
    BackendsFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "MCPMUX_BACKENDS",
        "MCPMUX_BACKENDS_FILE",
        "MCPMUX_MODERATION_ENABLED",
        "MCPMUX_MODERATION_API_KEY",
        "MCPMUX_MODERATION_URL",
        "MCPMUX_CONNECT_TIMEOUT_MS",
        "MCPMUX_TRANSPORT",
        "MCPMUX_BIND_ADDRESS",
        "MCPMUX_LOG_FORMAT",
    ];

    /// Helper to clear env vars before and after tests
    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        env::set_var("MCPMUX_BACKENDS", "[]");

        let config = Config::from_env().unwrap();
        assert!(!config.gateway.moderation_enabled);
        assert_eq!(config.gateway.moderation_url, DEFAULT_CLASSIFIER_URL);
        assert_eq!(config.gateway.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.transport, FrontendTransport::Stdio);
        assert_eq!(config.bind_address, "127.0.0.1:3000");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.backends.is_empty());

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_log_format_is_readable_before_config() {
        cleanup_config();
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

        env::set_var("MCPMUX_LOG_FORMAT", "JSON");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);

        env::set_var("MCPMUX_LOG_FORMAT", "xml");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
        env::set_var("MCPMUX_BACKENDS", "[]");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "MCPMUX_LOG_FORMAT", .. })
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_moderation_requires_credential() {
        cleanup_config();
        env::set_var("MCPMUX_BACKENDS", "[]");
        env::set_var("MCPMUX_MODERATION_ENABLED", "true");

        let result = Config::from_env();
        assert!(
            matches!(result, Err(ConfigError::ModerationCredentialMissing)),
            "got {result:?}"
        );

        // Blank credential counts as missing
        env::set_var("MCPMUX_MODERATION_API_KEY", "   ");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ModerationCredentialMissing)
        ));

        env::set_var("MCPMUX_MODERATION_API_KEY", "secret");
        let config = Config::from_env().unwrap();
        assert!(config.gateway.moderation_enabled);
        assert_eq!(config.gateway.moderation_api_key.as_deref(), Some("secret"));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_moderation_check_precedes_backend_parsing() {
        cleanup_config();
        env::set_var("MCPMUX_BACKENDS", "not json");
        env::set_var("MCPMUX_MODERATION_ENABLED", "1");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ModerationCredentialMissing)
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_inline_backends_and_overrides() {
        cleanup_config();
        env::set_var(
            "MCPMUX_BACKENDS",
            r#"[{"name": "Files", "command": "fs-server --root /tmp"}, {"name": "web", "url": "http://localhost:9000/mcp"}]"#,
        );
        env::set_var("MCPMUX_CONNECT_TIMEOUT_MS", "1500");
        env::set_var("MCPMUX_TRANSPORT", "HTTP");
        env::set_var("MCPMUX_LOG_FORMAT", "json");
        env::set_var("MCPMUX_BIND_ADDRESS", "0.0.0.0:8080");

        let config = Config::from_env().unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].name, "files");
        assert_eq!(config.gateway.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.transport, FrontendTransport::Http);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.bind_address, "0.0.0.0:8080");

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        cleanup_config();
        env::set_var("MCPMUX_BACKENDS", "[]");

        env::set_var("MCPMUX_CONNECT_TIMEOUT_MS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "MCPMUX_CONNECT_TIMEOUT_MS", .. })
        ));
        env::remove_var("MCPMUX_CONNECT_TIMEOUT_MS");

        env::set_var("MCPMUX_TRANSPORT", "websocket");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "MCPMUX_TRANSPORT", .. })
        ));
        env::remove_var("MCPMUX_TRANSPORT");

        env::set_var("MCPMUX_MODERATION_ENABLED", "maybe");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "MCPMUX_MODERATION_ENABLED", .. })
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_duplicate_backends_rejected() {
        cleanup_config();
        env::set_var(
            "MCPMUX_BACKENDS",
            r#"[{"name": "a", "command": "x"}, {"name": "A", "command": "y"}]"#,
        );

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Backends(DescriptorError::DuplicateName { .. }))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_backends_file() {
        cleanup_config();

        let path = env::temp_dir().join(format!("mcpmux-config-test-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"backends": [{"name": "remote", "url": "https://example.com/mcp"}]}"#).unwrap();
        env::set_var("MCPMUX_BACKENDS_FILE", &path);

        let config = Config::from_env().unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].name, "remote");

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::BackendsFile { .. })
        ));

        cleanup_config();
    }
}
