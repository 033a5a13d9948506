//! Server configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Value of `database_url` that selects the in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0:8000")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// SQLite URL, or `memory` for the in-memory store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Whether to enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Allowed CORS origins; any origin when empty
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Registrations allowed per client within the window
    #[serde(default = "default_registration_limit")]
    pub registration_limit: u32,

    /// Registration throttle window in seconds
    #[serde(default = "default_registration_window_secs")]
    pub registration_window_secs: u64,

    /// Number of trusted reverse proxies in front of the server. When zero,
    /// `X-Forwarded-For` is ignored and clients are keyed by socket address.
    #[serde(default)]
    pub num_proxies: usize,

    /// Minimum password length for new accounts
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// SMTP settings for abnormal reading alerts; alerts are only logged
    /// when absent
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// SMTP configuration for outgoing alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Login name
    #[serde(default)]
    pub username: Option<String>,

    /// Login password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Sender address
    pub from_address: String,

    /// Upgrade the connection with STARTTLS
    #[serde(default = "default_smtp_starttls")]
    pub starttls: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_url() -> String {
    "sqlite:pulselog.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable_cors() -> bool {
    true
}

fn default_registration_limit() -> u32 {
    10
}

fn default_registration_window_secs() -> u64 {
    3600
}

fn default_min_password_length() -> usize {
    auth::DEFAULT_MIN_PASSWORD_LENGTH
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_starttls() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            database_url: default_database_url(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            enable_cors: default_enable_cors(),
            cors_origins: Vec::new(),
            registration_limit: default_registration_limit(),
            registration_window_secs: default_registration_window_secs(),
            num_proxies: 0,
            min_password_length: default_min_password_length(),
            smtp: None,
        }
    }
}

impl ServerConfig {
    /// Configuration for tests: in-memory store, default limits.
    pub fn for_tests() -> Self {
        Self {
            database_url: MEMORY_DATABASE_URL.to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from defaults, the config file and the environment
    ///
    /// Environment variables take precedence over the file.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let mut config = match Self::find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Overrides fields from `PULSELOG_*` variables returned by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PULSELOG_BIND_ADDRESS") {
            self.bind_address = addr;
        }

        if let Some(url) = lookup("PULSELOG_DATABASE_URL") {
            self.database_url = url;
        }

        if let Some(level) = lookup("PULSELOG_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Some(format) = lookup("PULSELOG_LOG_FORMAT") {
            self.log_format =
                LogFormat::parse(&format).ok_or_else(|| invalid("PULSELOG_LOG_FORMAT", &format))?;
        }

        if let Some(val) = lookup("PULSELOG_ENABLE_CORS") {
            self.enable_cors = parse_var("PULSELOG_ENABLE_CORS", &val)?;
        }

        if let Some(origins) = lookup("PULSELOG_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(val) = lookup("PULSELOG_REGISTRATION_LIMIT") {
            self.registration_limit = parse_var("PULSELOG_REGISTRATION_LIMIT", &val)?;
        }

        if let Some(val) = lookup("PULSELOG_REGISTRATION_WINDOW_SECS") {
            self.registration_window_secs = parse_var("PULSELOG_REGISTRATION_WINDOW_SECS", &val)?;
        }

        if let Some(val) = lookup("PULSELOG_NUM_PROXIES") {
            self.num_proxies = parse_var("PULSELOG_NUM_PROXIES", &val)?;
        }

        if let Some(val) = lookup("PULSELOG_MIN_PASSWORD_LENGTH") {
            self.min_password_length = parse_var("PULSELOG_MIN_PASSWORD_LENGTH", &val)?;
        }

        // SMTP is configured from the environment only when host and sender
        // are both present
        if let (Some(host), Some(from_address)) =
            (lookup("PULSELOG_SMTP_HOST"), lookup("PULSELOG_SMTP_FROM"))
        {
            let port = match lookup("PULSELOG_SMTP_PORT") {
                Some(val) => parse_var("PULSELOG_SMTP_PORT", &val)?,
                None => default_smtp_port(),
            };
            let starttls = match lookup("PULSELOG_SMTP_STARTTLS") {
                Some(val) => parse_var("PULSELOG_SMTP_STARTTLS", &val)?,
                None => default_smtp_starttls(),
            };

            self.smtp = Some(SmtpConfig {
                host,
                port,
                username: lookup("PULSELOG_SMTP_USERNAME"),
                password: lookup("PULSELOG_SMTP_PASSWORD"),
                from_address,
                starttls,
            });
        }

        Ok(())
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PULSELOG_CONFIG") {
            return Some(PathBuf::from(path));
        }

        let locations = [
            PathBuf::from("pulselog.toml"),
            PathBuf::from("/etc/pulselog/server.toml"),
            dirs::config_dir()
                .map(|p| p.join("pulselog").join("server.toml"))
                .unwrap_or_default(),
        ];

        locations.into_iter().find(|p| p.is_file())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::Invalid("bind_address must not be empty".into()));
        }

        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }

        if self.registration_limit == 0 || self.registration_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "registration limit and window must be positive".into(),
            ));
        }

        if let Some(smtp) = &self.smtp {
            if !smtp.from_address.contains('@') {
                return Err(ConfigError::Invalid(format!(
                    "smtp.from_address {:?} is not an email address",
                    smtp.from_address
                )));
            }
            if smtp.username.is_some() != smtp.password.is_some() {
                return Err(ConfigError::Invalid(
                    "smtp username and password must be set together".into(),
                ));
            }
        }

        if self.uses_memory_store() {
            tracing::warn!("Using the in-memory store; data is lost on restart");
        }

        Ok(())
    }

    /// Returns true if the in-memory store is selected
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidVar {
        key,
        value: value.to_string(),
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidVar { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.registration_limit, 10);
        assert_eq!(config.registration_window_secs, 3600);
        assert_eq!(config.num_proxies, 0);
        assert_eq!(config.min_password_length, 8);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.smtp.is_none());
        assert!(!config.uses_memory_store());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env(lookup(&[
                ("PULSELOG_BIND_ADDRESS", "127.0.0.1:9000"),
                ("PULSELOG_DATABASE_URL", "memory"),
                ("PULSELOG_LOG_FORMAT", "JSON"),
                ("PULSELOG_REGISTRATION_LIMIT", "3"),
                ("PULSELOG_NUM_PROXIES", "1"),
                ("PULSELOG_CORS_ORIGINS", "https://a.example, https://b.example,"),
            ]))
            .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert!(config.uses_memory_store());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.registration_limit, 3);
        assert_eq!(config.num_proxies, 1);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env(lookup(&[("PULSELOG_REGISTRATION_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                key: "PULSELOG_REGISTRATION_LIMIT",
                ..
            }
        ));
    }

    #[test]
    fn test_smtp_from_env() {
        let mut config = ServerConfig::default();
        config
            .apply_env(lookup(&[
                ("PULSELOG_SMTP_HOST", "smtp.example.com"),
                ("PULSELOG_SMTP_FROM", "alerts@example.com"),
                ("PULSELOG_SMTP_PORT", "2525"),
            ]))
            .unwrap();

        let smtp = config.smtp.as_ref().unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 2525);
        assert!(smtp.starttls);
        assert!(config.validate().is_ok());

        // Host without sender leaves SMTP disabled
        let mut config = ServerConfig::default();
        config
            .apply_env(lookup(&[("PULSELOG_SMTP_HOST", "smtp.example.com")]))
            .unwrap();
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_toml_config() {
        let config: ServerConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:8080"
            log_format = "json"

            [smtp]
            host = "mail.example.com"
            from_address = "noreply@example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.database_url, "sqlite:pulselog.db");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.smtp.as_ref().unwrap().port, 587);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ServerConfig {
            registration_limit: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.smtp = Some(SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("user".into()),
            password: None,
            from_address: "alerts@example.com".into(),
            starttls: true,
        });
        assert!(config.validate().is_err());
    }
}
