//! Agent personalization bundle and its merge with built-in defaults.

use serde::{Deserialize, Serialize};

use crate::core::realtime::{RealtimeConfig, TurnDetectionConfig};

/// Turn-detection overrides as delivered by the lookup service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurnDetection {
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Audio kept before detected speech
    #[serde(default)]
    pub leading_silence_ms: Option<u32>,
    /// Silence that ends an utterance
    #[serde(default)]
    pub trailing_silence_ms: Option<u32>,
}

/// Personalization bundle returned by the agent lookup service.
///
/// Every field is optional; absent or empty values fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub turn_detection: Option<AgentTurnDetection>,
    #[serde(default)]
    pub company_name: Option<String>,
}

/// Built-in values used when no profile is found.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefaults {
    pub system_prompt: String,
    pub welcome_message: String,
    pub voice: String,
    pub temperature: Option<f32>,
    pub turn_detection: TurnDetectionConfig,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly and helpful phone assistant. \
Keep your answers short and conversational, and ask a clarifying question when the caller's \
request is ambiguous.";

pub const DEFAULT_WELCOME_MESSAGE: &str = "Hello! How can I help you today?";

pub const DEFAULT_VOICE: &str = "alloy";

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            temperature: None,
            turn_detection: TurnDetectionConfig::default(),
        }
    }
}

/// Where a call's configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Remote,
    Defaults,
}

/// Effective, immutable configuration of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub welcome_message: String,
    pub voice: String,
    pub temperature: Option<f32>,
    pub turn_detection: TurnDetectionConfig,
    pub company_name: Option<String>,
    pub source: ConfigSource,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AgentConfig {
    /// Merge a looked-up profile over the defaults, field by field.
    pub fn resolve(profile: Option<AgentProfile>, defaults: &AgentDefaults) -> Self {
        let Some(profile) = profile else {
            return Self::from_defaults(defaults);
        };

        let company_name = non_empty(profile.company_name);
        let welcome_message = match (non_empty(profile.welcome_message), &company_name) {
            (Some(welcome), _) => welcome,
            (None, Some(company)) => company_welcome(company),
            (None, None) => defaults.welcome_message.clone(),
        };

        let mut turn_detection = defaults.turn_detection;
        if let Some(td) = profile.turn_detection {
            if let Some(threshold) = td.threshold.filter(|t| t.is_finite()) {
                turn_detection.threshold = threshold.clamp(0.0, 1.0);
            }
            if let Some(leading) = td.leading_silence_ms {
                turn_detection.prefix_padding_ms = leading;
            }
            if let Some(trailing) = td.trailing_silence_ms {
                turn_detection.silence_duration_ms = trailing;
            }
        }

        Self {
            system_prompt: non_empty(profile.system_prompt)
                .unwrap_or_else(|| defaults.system_prompt.clone()),
            welcome_message,
            voice: non_empty(profile.voice_id).unwrap_or_else(|| defaults.voice.clone()),
            temperature: profile
                .temperature
                .filter(|t| t.is_finite())
                .or(defaults.temperature),
            turn_detection,
            company_name,
            source: ConfigSource::Remote,
        }
    }

    pub fn from_defaults(defaults: &AgentDefaults) -> Self {
        Self {
            system_prompt: defaults.system_prompt.clone(),
            welcome_message: defaults.welcome_message.clone(),
            voice: defaults.voice.clone(),
            temperature: defaults.temperature,
            turn_detection: defaults.turn_detection,
            company_name: None,
            source: ConfigSource::Defaults,
        }
    }

    /// Session parameters for the upstream connection.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            voice: Some(self.voice.clone()),
            instructions: Some(self.system_prompt.clone()),
            temperature: self.temperature,
            turn_detection: self.turn_detection,
            ..Default::default()
        }
    }

    /// One-off instructions for the greeting response.
    pub fn welcome_instructions(&self) -> String {
        format!(
            "Start the call by greeting the caller with exactly this message: \"{}\"",
            self.welcome_message
        )
    }
}

fn company_welcome(company: &str) -> String {
    format!("Hello, thank you for calling {company}. How can I help you today?")
}
