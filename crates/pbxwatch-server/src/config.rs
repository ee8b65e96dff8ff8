//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Manager interface connection settings.
    #[serde(default)]
    pub ami: AmiConfig,

    /// Monitoring behavior.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "pbxwatch_monitor=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Manager interface configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AmiConfig {
    /// `host:port` of the PBX manager interface.
    #[serde(default = "default_ami_addr")]
    pub addr: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// First reconnect delay; doubles on every consecutive failure.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the reconnect delay.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Pause between login and the first bootstrap query.
    #[serde(default = "default_bootstrap_delay_ms")]
    pub bootstrap_delay_ms: u64,

    /// Pause before the contact enumeration is repeated.
    #[serde(default = "default_contacts_retry_delay_ms")]
    pub contacts_retry_delay_ms: u64,
}

/// Monitoring behavior configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between reconciliation sweeps. Zero disables sweeping.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds between liveness pings on observer sockets.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Let presence events clear an agent stuck ringing.
    #[serde(default)]
    pub presence_clears_ringing: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "pbxwatch.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ami_addr() -> String {
    "127.0.0.1:5038".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_bootstrap_delay_ms() -> u64 {
    500
}

fn default_contacts_retry_delay_ms() -> u64 {
    2_000
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_keepalive_secs() -> u64 {
    25
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            addr: default_ami_addr(),
            username: String::new(),
            secret: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            bootstrap_delay_ms: default_bootstrap_delay_ms(),
            contacts_retry_delay_ms: default_contacts_retry_delay_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            keepalive_secs: default_keepalive_secs(),
            presence_clears_ringing: false,
        }
    }
}

impl AmiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PBXWATCH_HOST` overrides `server.host`
/// - `PBXWATCH_PORT` overrides `server.port`
/// - `PBXWATCH_DB_PATH` overrides `database.path`
/// - `PBXWATCH_LOG_LEVEL` overrides `logging.level`
/// - `PBXWATCH_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PBXWATCH_AMI_ADDR`, `PBXWATCH_AMI_USER`, `PBXWATCH_AMI_SECRET`
///   override the manager interface address and credentials
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PBXWATCH_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PBXWATCH_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("PBXWATCH_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("PBXWATCH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PBXWATCH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(addr) = var("PBXWATCH_AMI_ADDR") {
        config.ami.addr = addr;
    }
    if let Some(user) = var("PBXWATCH_AMI_USER") {
        config.ami.username = user;
    }
    if let Some(secret) = var("PBXWATCH_AMI_SECRET") {
        config.ami.secret = secret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ami]
            username = "monitor"
            secret = "s3cret"

            [monitor]
            sweep_interval_secs = 0
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "pbxwatch.db");
        assert_eq!(config.database.pool_max_size, 8);
        assert_eq!(config.ami.addr, "127.0.0.1:5038");
        assert_eq!(config.ami.username, "monitor");
        assert_eq!(config.ami.reconnect_max(), Duration::from_secs(30));
        assert_eq!(config.monitor.sweep_interval_secs, 0);
        assert_eq!(config.monitor.keepalive_secs, 25);
        assert!(!config.monitor.presence_clears_ringing);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).expect("defaults");
        assert_eq!(config.monitor.sweep_interval_secs, 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").expect("write");
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PBXWATCH_PORT", "9090"),
            ("PBXWATCH_HOST", "not-an-ip"),
            ("PBXWATCH_LOG_JSON", "1"),
            ("PBXWATCH_AMI_ADDR", "10.1.1.1:5038"),
            ("PBXWATCH_AMI_SECRET", "from-env"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, default_host(), "unparseable host is ignored");
        assert!(config.logging.json);
        assert_eq!(config.ami.addr, "10.1.1.1:5038");
        assert_eq!(config.ami.secret, "from-env");
        assert_eq!(config.ami.username, "");
    }
}
