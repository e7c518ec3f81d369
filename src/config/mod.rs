//! Process configuration, read from the environment at startup.
//!
//! Recognized variables: `SEARCH_API_KEY`, `LLM_API_KEY`, `LISTEN_PORT`,
//! `WEB_ORIGIN`. The API keys are required for live operation but optional
//! here, so test harnesses can wire stub back-ends without touching the
//! environment; binaries enforce presence at startup.

use thiserror::Error;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// Default CORS allow-origin.
pub const DEFAULT_WEB_ORIGIN: &str = "http://localhost:5173";

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is present but unusable.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    /// A required variable is absent.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Search backend subscription key.
    pub search_api_key: Option<String>,

    /// LLM backend API key.
    pub llm_api_key: Option<String>,

    /// HTTP listen port.
    pub listen_port: u16,

    /// CORS allow-origin for the browser client.
    pub web_origin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            search_api_key: None,
            llm_api_key: None,
            listen_port: DEFAULT_PORT,
            web_origin: DEFAULT_WEB_ORIGIN.to_string(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the environment.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` when `LISTEN_PORT` is not a port
    /// number. Missing keys are tolerated here; call [`require_keys`] before
    /// wiring live back-ends.
    ///
    /// [`require_keys`]: AppConfig::require_keys
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_port = match std::env::var("LISTEN_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("LISTEN_PORT", raw))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            search_api_key: read_non_empty("SEARCH_API_KEY"),
            llm_api_key: read_non_empty("LLM_API_KEY"),
            listen_port,
            web_origin: read_non_empty("WEB_ORIGIN")
                .unwrap_or_else(|| DEFAULT_WEB_ORIGIN.to_string()),
        })
    }

    /// Enforce that both API keys are present, returning them.
    ///
    /// # Errors
    /// Returns `ConfigError::Missing` naming the first absent key.
    pub fn require_keys(&self) -> Result<(String, String), ConfigError> {
        let search = self
            .search_api_key
            .clone()
            .ok_or(ConfigError::Missing("SEARCH_API_KEY"))?;
        let llm = self
            .llm_api_key
            .clone()
            .ok_or(ConfigError::Missing("LLM_API_KEY"))?;
        Ok((search, llm))
    }
}

fn read_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
