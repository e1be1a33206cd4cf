//! Merging YAML and environment configurations.
//!
//! Priority: YAML > environment > defaults.

use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig};
use crate::core::agent_config::{DEFAULT_SYSTEM_PROMPT, DEFAULT_VOICE, DEFAULT_WELCOME_MESSAGE};
use crate::core::realtime::openai::{OPENAI_REALTIME_URL, OpenAIRealtimeModel};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_AGENT_CONFIG_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 10;

/// Build a [`ServerConfig`] from the environment with optional YAML overrides.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let realtime = yaml.realtime.unwrap_or_default();
    let agent = yaml.agent.unwrap_or_default();
    let limits = yaml.limits.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls_yaml = server.tls.unwrap_or_default();
    let cert_path = tls_yaml.cert_path.or(env.tls_cert_path);
    let key_path = tls_yaml.key_path.or(env.tls_key_path);
    let tls = match (cert_path, key_path) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => {
            return Err("TLS requires both TLS_CERT_PATH and TLS_KEY_PATH".into());
        }
    };

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,

        openai_api_key: realtime.api_key.or(env.openai_api_key),
        realtime_url: realtime
            .url
            .or(env.realtime_url)
            .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
        realtime_model: realtime
            .model
            .or(env.realtime_model)
            .unwrap_or_else(|| OpenAIRealtimeModel::default().as_str().to_string()),
        realtime_commit_on_speech_stopped: realtime
            .commit_on_speech_stopped
            .or(env.realtime_commit_on_speech_stopped)
            .unwrap_or(false),

        agent_config_url: agent.config_url.or(env.agent_config_url),
        agent_config_timeout_seconds: agent
            .config_timeout_seconds
            .or(env.agent_config_timeout_seconds)
            .unwrap_or(DEFAULT_AGENT_CONFIG_TIMEOUT_SECONDS),
        default_system_prompt: agent
            .system_prompt
            .or(env.default_system_prompt)
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        default_welcome_message: agent
            .welcome_message
            .or(env.default_welcome_message)
            .unwrap_or_else(|| DEFAULT_WELCOME_MESSAGE.to_string()),
        default_voice: agent
            .voice
            .or(env.default_voice)
            .unwrap_or_else(|| DEFAULT_VOICE.to_string()),

        max_concurrent_calls: limits.max_concurrent_calls.or(env.max_concurrent_calls),
        shutdown_grace_seconds: limits
            .shutdown_grace_seconds
            .or(env.shutdown_grace_seconds)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECONDS),

        cors_allowed_origins: security
            .cors_allowed_origins
            .or(env.cors_allowed_origins),
    })
}
