//! Per-call agent personalization.
//!
//! A call's routing attributes are looked up once at stream start. Whatever
//! comes back is merged with [`AgentDefaults`] into an immutable
//! [`AgentConfig`]; a missing profile or a failed lookup yields the defaults.

mod profile;
mod resolver;

pub use profile::{
    AgentConfig, AgentDefaults, AgentProfile, AgentTurnDetection, ConfigSource,
    DEFAULT_SYSTEM_PROMPT, DEFAULT_VOICE, DEFAULT_WELCOME_MESSAGE,
};
pub use resolver::{
    AgentConfigResolver, HttpAgentConfigResolver, NoopAgentConfigResolver, ResolveError,
};
