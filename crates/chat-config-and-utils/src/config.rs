//! Client configuration.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default REST API base URL (can be overridden at compile time via CHATAPP_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("CHATAPP_API_URL") {
    Some(url) => url,
    None => "http://localhost:8000/api",
};

/// Default WebSocket base URL (can be overridden at compile time via CHATAPP_WS_URL env var).
pub const DEFAULT_WS_URL: &str = match option_env!("CHATAPP_WS_URL") {
    Some(url) => url,
    None => "ws://localhost:8000",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// REST API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// WebSocket base URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            ws_url: default_ws_url(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables win over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| CoreError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(level) = env_value("CHATAPP_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = env_value("CHATAPP_API_URL") {
            self.api_url = url;
        }
        if let Some(url) = env_value("CHATAPP_WS_URL") {
            self.ws_url = url;
        }
    }

    /// Check that both base URLs parse and use the expected schemes.
    pub fn validate(&self) -> CoreResult<()> {
        let api = self.api_url()?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "api_url must be http or https, got {}",
                api.scheme()
            )));
        }

        let ws = self.ws_url()?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(CoreError::Config(format!(
                "ws_url must be ws or wss, got {}",
                ws.scheme()
            )));
        }

        Ok(())
    }

    /// Get the REST API base URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Get the WebSocket base URL as a parsed URL.
    pub fn ws_url(&self) -> CoreResult<Url> {
        Url::parse(&self.ws_url).map_err(CoreError::from)
    }

    /// Whether the client talks to the API over TLS. Realtime sockets are
    /// upgraded to `wss` to match.
    pub fn secure_context(&self) -> bool {
        self.api_url()
            .map(|url| url.scheme() == "https")
            .unwrap_or(false)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{ "log_level": "debug" }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_config_load_from_broken_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ log_level: debug").unwrap();

        match Config::load_from_file(&config_path) {
            Err(CoreError::ConfigFile { path, .. }) => assert_eq!(path, config_path),
            other => panic!("expected ConfigFile error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            log_level: "trace".to_string(),
            api_url: "https://chat.example.com/api".to_string(),
            ws_url: "wss://chat.example.com".to_string(),
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.api_url, "https://chat.example.com/api");
        assert_eq!(loaded.ws_url, "wss://chat.example.com");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert!(config.validate().is_ok());
        assert!(!paths.config_file().exists());
    }

    #[test]
    fn test_secure_context_follows_api_scheme() {
        let mut config = Config::default();
        config.api_url = "https://chat.example.com/api".to_string();
        assert!(config.secure_context());

        config.api_url = "http://localhost:8000/api".to_string();
        assert!(!config.secure_context());

        config.api_url = "not a url".to_string();
        assert!(!config.secure_context());
    }

    #[test]
    fn test_validate_rejects_wrong_schemes() {
        let mut config = Config::default();
        config.ws_url = "http://localhost:8000".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let mut config = Config::default();
        config.api_url = "ftp://localhost".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.api_url = "not a valid url".to_string();

        assert!(config.api_url().is_err());
        assert!(config.validate().is_err());
    }
}
