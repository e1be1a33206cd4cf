//! Server configuration.
//!
//! Values come from three layers with priority YAML > environment > defaults.
//! The `.env` file is loaded in `main.rs` before any of this runs, so it acts
//! as part of the environment layer.

mod env;
mod merge;
mod validation;
mod yaml;

use std::path::PathBuf;
use std::time::Duration;

pub use merge::{
    DEFAULT_AGENT_CONFIG_TIMEOUT_SECONDS, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_SHUTDOWN_GRACE_SECONDS,
};
pub use yaml::YamlConfig;

use crate::core::agent_config::AgentDefaults;
use crate::core::bridge::BridgeSettings;

/// TLS configuration for HTTPS/WSS support
#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    /// Path to the certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// The realtime API key is scrubbed from memory when the config is dropped.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Realtime AI service
    pub openai_api_key: Option<String>,
    pub realtime_url: String,
    pub realtime_model: String,
    pub realtime_commit_on_speech_stopped: bool,

    // Agent personalization
    pub agent_config_url: Option<String>,
    pub agent_config_timeout_seconds: u64,
    pub default_system_prompt: String,
    pub default_welcome_message: String,
    pub default_voice: String,

    // Call limits
    pub max_concurrent_calls: Option<usize>,
    pub shutdown_grace_seconds: u64,

    /// Comma-separated origins, or `*`. `None` disables CORS headers.
    pub cors_allowed_origins: Option<String>,
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as the base layer
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged configuration fails validation.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_api_key(&self.openai_api_key)?;
        validation::validate_realtime_url(&self.realtime_url)?;
        validation::validate_agent_config_url(
            &self.agent_config_url,
            self.agent_config_timeout_seconds,
        )?;
        validation::validate_tls(&self.tls)?;
        validation::validate_limits(self.max_concurrent_calls)?;
        Ok(())
    }

    /// Get the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn agent_config_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_config_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Agent values used when a call has no profile or the lookup fails.
    pub fn agent_defaults(&self) -> AgentDefaults {
        AgentDefaults {
            system_prompt: self.default_system_prompt.clone(),
            welcome_message: self.default_welcome_message.clone(),
            voice: self.default_voice.clone(),
            ..AgentDefaults::default()
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            defaults: self.agent_defaults(),
            commit_on_speech_stopped: self.realtime_commit_on_speech_stopped,
            ..BridgeSettings::default()
        }
    }
}
