use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub access: AccessConfig,
    pub narrative: NarrativeConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::parse(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        )?;

        let database_path = non_empty_var("MINDLAB_DATABASE_PATH").map(PathBuf::from);
        let definitions_dir = non_empty_var("MINDLAB_DEFINITIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("definitions"));
        let sync_on_startup = bool_var("MINDLAB_SYNC_ON_STARTUP", true)?;

        let admin_uids = env::var("MINDLAB_ADMIN_UIDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(str::to_string)
            .collect();

        let narrative_url = non_empty_var("MINDLAB_NARRATIVE_URL");
        let narrative_model = non_empty_var("MINDLAB_NARRATIVE_MODEL")
            .unwrap_or_else(|| "llama3.1:8b".to_string());
        let narrative_timeout = match non_empty_var("MINDLAB_NARRATIVE_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout)?,
            None => 60,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            store: StoreConfig {
                database_path,
                definitions_dir,
                sync_on_startup,
            },
            access: AccessConfig { admin_uids },
            narrative: NarrativeConfig {
                base_url: narrative_url,
                model: narrative_model,
                timeout_secs: narrative_timeout,
            },
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bool_var(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = non_empty_var(key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value: raw }),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidLogFormat {
                value: value.to_string(),
            }),
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Where sessions and content live, and where bundled definitions are read from.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `None` keeps everything in memory for the lifetime of the process.
    pub database_path: Option<PathBuf>,
    pub definitions_dir: PathBuf,
    pub sync_on_startup: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AccessConfig {
    pub admin_uids: Vec<String>,
}

/// Optional narrative generator endpoint.
#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl NarrativeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidLogFormat { value: String },
    InvalidBool { key: &'static str, value: String },
    InvalidTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidLogFormat { value } => {
                write!(f, "APP_LOG_FORMAT must be 'compact' or 'json', got '{value}'")
            }
            ConfigError::InvalidBool { key, value } => {
                write!(f, "{key} must be a boolean, got '{value}'")
            }
            ConfigError::InvalidTimeout => {
                write!(f, "MINDLAB_NARRATIVE_TIMEOUT_SECS must be a whole number of seconds")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidLogFormat { .. }
            | ConfigError::InvalidBool { .. }
            | ConfigError::InvalidTimeout => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "APP_LOG_FORMAT",
            "MINDLAB_DATABASE_PATH",
            "MINDLAB_DEFINITIONS_DIR",
            "MINDLAB_SYNC_ON_STARTUP",
            "MINDLAB_ADMIN_UIDS",
            "MINDLAB_NARRATIVE_URL",
            "MINDLAB_NARRATIVE_MODEL",
            "MINDLAB_NARRATIVE_TIMEOUT_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.log_format, LogFormat::Compact);
        assert!(config.store.database_path.is_none());
        assert_eq!(config.store.definitions_dir, PathBuf::from("definitions"));
        assert!(config.store.sync_on_startup);
        assert!(config.access.admin_uids.is_empty());
        assert!(config.narrative.base_url.is_none());
        assert_eq!(config.narrative.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn reads_store_and_access_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MINDLAB_DATABASE_PATH", "/var/lib/mindlab/mindlab.db");
        env::set_var("MINDLAB_SYNC_ON_STARTUP", "off");
        env::set_var("MINDLAB_ADMIN_UIDS", "alice, bob ,,");
        env::set_var("APP_LOG_FORMAT", "JSON");

        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.store.database_path,
            Some(PathBuf::from("/var/lib/mindlab/mindlab.db"))
        );
        assert!(!config.store.sync_on_startup);
        assert_eq!(config.access.admin_uids, vec!["alice", "bob"]);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        reset_env();
    }

    #[test]
    fn rejects_invalid_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();

        env::set_var("APP_PORT", "70000");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidPort)));
        reset_env();

        env::set_var("APP_LOG_FORMAT", "pretty");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidLogFormat { .. })
        ));
        reset_env();

        env::set_var("MINDLAB_SYNC_ON_STARTUP", "maybe");
        match AppConfig::load() {
            Err(ConfigError::InvalidBool { key, value }) => {
                assert_eq!(key, "MINDLAB_SYNC_ON_STARTUP");
                assert_eq!(value, "maybe");
            }
            other => panic!("expected invalid bool, got {other:?}"),
        }
        reset_env();
    }
}
