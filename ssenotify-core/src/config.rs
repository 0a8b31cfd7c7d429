use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub notifications: NotificationConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// How long shutdown waits for open streams to drain
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8000,
            shutdown_grace_seconds: 5,
        }
    }
}

/// Session channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Interval between `:keep-alive` comments on open streams (0 disables them)
    pub keep_alive_seconds: u64,
    /// Sessions without a subscriber are forgotten after this long (0 = never)
    pub idle_session_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            keep_alive_seconds: 15,
            idle_session_ttl_seconds: 0,
            sweep_interval_seconds: 60,
        }
    }
}

impl NotificationConfig {
    #[must_use]
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_seconds > 0).then(|| Duration::from_secs(self.keep_alive_seconds))
    }

    #[must_use]
    pub fn idle_session_ttl(&self) -> Option<Duration> {
        (self.idle_session_ttl_seconds > 0)
            .then(|| Duration::from_secs(self.idle_session_ttl_seconds))
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Cross-origin settings for browser clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty means any origin
    pub allow_origins: Vec<String>,
    /// Only honoured together with an explicit origin list
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SSENOTIFY_SERVER__HTTP_PORT, SSENOTIFY_NOTIFICATIONS__KEEP_ALIVE_SECONDS, ...
        builder = builder.add_source(
            Environment::with_prefix("SSENOTIFY")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors.allow_origins")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// Every problem is reported, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("server.http_port must be greater than 0".to_string());
        }
        if self.notifications.idle_session_ttl_seconds > 0
            && self.notifications.sweep_interval_seconds == 0
        {
            errors.push(
                "notifications.sweep_interval_seconds must be greater than 0 when an idle session TTL is set"
                    .to_string(),
            );
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.cors.allow_credentials && self.cors.allow_origins.is_empty() {
            errors.push(
                "cors.allow_credentials requires an explicit cors.allow_origins list".to_string(),
            );
        }
        for origin in &self.cors.allow_origins {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                errors.push(format!("cors.allow_origins entry \"{origin}\" is not an http(s) origin"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Serialises tests that read or write `SSENOTIFY_*` variables
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.http_port, 8000);
        assert_eq!(config.notifications.keep_alive(), Some(Duration::from_secs(15)));
        assert_eq!(config.notifications.idle_session_ttl(), None);
        assert!(config.cors.allow_origins.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 8080,
                shutdown_grace_seconds: 1,
            },
            ..Default::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_reports_every_error() {
        let config = Config {
            server: ServerConfig {
                host: String::new(),
                http_port: 0,
                shutdown_grace_seconds: 5,
            },
            logging: LoggingConfig {
                format: "xml".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("server.host")));
        assert!(errors.iter().any(|e| e.contains("server.http_port")));
        assert!(errors.iter().any(|e| e.contains("logging.format")));
    }

    #[test]
    fn test_validate_cors_credentials_need_origins() {
        let mut config = Config::default();
        config.cors.allow_credentials = true;
        assert!(config.validate().is_err());

        config.cors.allow_origins = vec!["http://localhost:3000".to_string()];
        assert!(config.validate().is_ok());

        config.cors.allow_origins.push("localhost:8000".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_keep_alive_disables_it() {
        let notifications = NotificationConfig {
            keep_alive_seconds: 0,
            ..Default::default()
        };
        assert_eq!(notifications.keep_alive(), None);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "server:\n  http_port: 9123\nnotifications:\n  idle_session_ttl_seconds: 600\n",
        )
        .unwrap();

        let config = {
            let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            Config::from_file(path.to_str().unwrap()).unwrap()
        };
        assert_eq!(config.server.http_port, 9123);
        assert_eq!(
            config.notifications.idle_session_ttl(),
            Some(Duration::from_secs(600))
        );
        // Untouched sections keep their defaults
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "server:\n  http_port: 9000\n  host: 127.0.0.1\nnotifications:\n  keep_alive_seconds: 30\n",
        )
        .unwrap();

        let vars = [
            ("SSENOTIFY_SERVER__HTTP_PORT", "9555"),
            ("SSENOTIFY_NOTIFICATIONS__KEEP_ALIVE_SECONDS", "0"),
            ("SSENOTIFY_CORS__ALLOW_ORIGINS", "http://a.test,http://b.test"),
        ];

        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let from_file = Config::from_file(path.to_str().unwrap());
        let env_only = Config::from_env();
        for (key, _) in vars {
            std::env::remove_var(key);
        }

        let config = from_file.unwrap();
        assert_eq!(config.server.http_port, 9555);
        // Keys without a variable come from the file
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.notifications.keep_alive(), None);
        assert_eq!(
            config.cors.allow_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );

        let config = env_only.unwrap();
        assert_eq!(config.server.http_port, 9555);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cors.allow_origins.len(), 2);
    }
}
