//! Configuration file support

use pagechat_chat::RetryConfig;
use pagechat_wire::{Credentials, DecoderConfig, MetadataPlacement};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for pagechat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL
    pub server_url: Option<String>,
    /// Key forwarded to the backend's model provider
    pub api_key: Option<String>,
    /// Field of study, used to tailor answers
    pub major: Option<String>,
    /// Default document index
    pub index: Option<String>,
    /// Stream decoding settings
    #[serde(default)]
    pub stream: StreamSettings,
    /// Retry settings for opening a stream
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Stream decoding settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// "trailing" (text, separator, JSON) or "leading" (JSON, separator, text)
    pub metadata_placement: Option<String>,
    /// Cap on buffered metadata, in bytes
    pub max_metadata_bytes: Option<usize>,
}

/// Retry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagechat")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for PAGECHAT_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("PAGECHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            server_url: Some("http://localhost:5000".to_string()),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("PAGECHAT_API_KEY").ok())
    }

    /// Credentials for outgoing requests, if an API key is available
    pub fn credentials(&self, major: Option<String>) -> Option<Credentials> {
        let api_key = self.get_api_key()?;
        let mut credentials = Credentials::new(api_key);
        credentials.user_profile = major.or_else(|| self.major.clone());
        Some(credentials)
    }

    /// Decoder settings from the `[stream]` table
    pub fn decoder_config(&self) -> DecoderConfig {
        let mut config = DecoderConfig {
            placement: self
                .stream
                .metadata_placement
                .as_deref()
                .map(parse_placement)
                .unwrap_or_default(),
            ..Default::default()
        };
        if let Some(max) = self.stream.max_metadata_bytes {
            config.max_metadata_len = max;
        }
        config
    }

    /// Retry settings from the `[retry]` table
    pub fn retry_config(&self) -> RetryConfig {
        let mut config = RetryConfig::default();
        if let Some(max) = self.retry.max_retries {
            config.max_retries = max;
        }
        if let Some(ms) = self.retry.initial_delay_ms {
            config.initial_delay = Duration::from_millis(ms);
        }
        config
    }
}

/// Parse a metadata placement name; unknown names fall back to trailing
pub fn parse_placement(s: &str) -> MetadataPlacement {
    match s.to_lowercase().as_str() {
        "leading" | "first" => MetadataPlacement::Leading,
        _ => MetadataPlacement::Trailing,
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# pagechat configuration file
# Place at ~/.config/pagechat/config.toml (Linux/Mac) or %APPDATA%\pagechat\config.toml (Windows)

# Backend base URL
server_url = "http://localhost:5000"

# API key forwarded to the backend (or set PAGECHAT_API_KEY)
# api_key = "sk-..."

# Your field of study; questions are refused until it is set
# major = "Linguistics"

# Default document index
# index = "lecture-notes"

[stream]
# "trailing": answer text, separator, JSON metadata
# "leading":  JSON metadata, separator, answer text
metadata_placement = "trailing"
# max_metadata_bytes = 1048576

[retry]
# max_retries = 2
# initial_delay_ms = 500
"#
}
