//! Environment variable loading.
//!
//! Every value is optional here; defaults are applied in [`super::merge`].

use std::env;
use std::str::FromStr;

/// Configuration values read from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,

    pub openai_api_key: Option<String>,
    pub realtime_url: Option<String>,
    pub realtime_model: Option<String>,
    pub realtime_commit_on_speech_stopped: Option<bool>,

    pub agent_config_url: Option<String>,
    pub agent_config_timeout_seconds: Option<u64>,
    pub default_system_prompt: Option<String>,
    pub default_welcome_message: Option<String>,
    pub default_voice: Option<String>,

    pub max_concurrent_calls: Option<usize>,
    pub shutdown_grace_seconds: Option<u64>,
    pub cors_allowed_origins: Option<String>,
}

impl EnvConfig {
    /// Read all known variables. Fails only on values that do not parse.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: env_string("HOST"),
            port: env_parse("PORT")?,
            tls_cert_path: env_string("TLS_CERT_PATH"),
            tls_key_path: env_string("TLS_KEY_PATH"),

            openai_api_key: env_string("OPENAI_API_KEY"),
            realtime_url: env_string("REALTIME_URL"),
            realtime_model: env_string("REALTIME_MODEL"),
            realtime_commit_on_speech_stopped: env_bool("REALTIME_COMMIT_ON_SPEECH_STOPPED")?,

            agent_config_url: env_string("AGENT_CONFIG_URL"),
            agent_config_timeout_seconds: env_parse("AGENT_CONFIG_TIMEOUT_SECONDS")?,
            default_system_prompt: env_string("DEFAULT_SYSTEM_PROMPT"),
            default_welcome_message: env_string("DEFAULT_WELCOME_MESSAGE"),
            default_voice: env_string("DEFAULT_VOICE"),

            max_concurrent_calls: env_parse("MAX_CONCURRENT_CALLS")?,
            shutdown_grace_seconds: env_parse("SHUTDOWN_GRACE_SECONDS")?,
            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
        })
    }
}

/// Read a variable, treating empty or whitespace-only values as unset.
pub(crate) fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key} ({raw}): {e}").into()),
        None => Ok(None),
    }
}

pub(crate) fn env_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_string(key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid boolean for {key}: {raw}").into()),
        },
        None => Ok(None),
    }
}
