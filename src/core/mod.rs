pub mod agent_config;
pub mod bridge;
pub mod codec;
pub mod realtime;
pub mod registry;
pub mod telephony;

pub use agent_config::{
    AgentConfig, AgentConfigResolver, AgentDefaults, AgentProfile, HttpAgentConfigResolver,
    NoopAgentConfigResolver, ResolveError,
};
pub use bridge::{BridgeContext, BridgeError, BridgeSettings, CallBridge, CallState, CallSummary};
pub use realtime::{
    OpenAIRealtimeConnector, RealtimeConfig, RealtimeConnector, RealtimeError, UpstreamEvent,
    UpstreamSession,
};
pub use registry::{CallRegistry, RegistryError};
pub use telephony::{DownstreamEvent, MediaSink, TelephonySession};
