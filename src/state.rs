use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::agent_config::{
    AgentConfigResolver, HttpAgentConfigResolver, NoopAgentConfigResolver, ResolveError,
};
use crate::core::bridge::{BridgeContext, BridgeSettings};
use crate::core::realtime::{OpenAIRealtimeConnector, RealtimeConnector};
use crate::core::registry::CallRegistry;

/// Shared application state handed to every route.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: CallRegistry,
    pub resolver: Arc<dyn AgentConfigResolver>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub settings: Arc<BridgeSettings>,
    /// Cancelled once when the process begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build the production state: OpenAI upstream, and an HTTP agent lookup
    /// when `AGENT_CONFIG_URL` is configured.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ResolveError> {
        let resolver: Arc<dyn AgentConfigResolver> = match config.agent_config_url.as_deref() {
            Some(url) => {
                info!(url = %url, "Agent configuration lookup enabled");
                Arc::new(HttpAgentConfigResolver::new(url, config.agent_config_timeout())?)
            }
            None => {
                info!("AGENT_CONFIG_URL not set, every call uses the default agent");
                Arc::new(NoopAgentConfigResolver)
            }
        };

        let connector: Arc<dyn RealtimeConnector> = Arc::new(OpenAIRealtimeConnector::new(
            config.openai_api_key.clone().unwrap_or_default(),
            config.realtime_url.clone(),
            config.realtime_model.clone(),
        ));

        Ok(Self::with_components(config, resolver, connector))
    }

    /// Build state around caller-supplied collaborators.
    pub fn with_components(
        config: ServerConfig,
        resolver: Arc<dyn AgentConfigResolver>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Arc<Self> {
        let registry = CallRegistry::new(config.max_concurrent_calls);
        let settings = Arc::new(config.bridge_settings());

        Arc::new(Self {
            config,
            registry,
            resolver,
            connector,
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    /// Collaborators for one new call bridge.
    pub fn bridge_context(&self) -> BridgeContext {
        BridgeContext {
            registry: self.registry.clone(),
            resolver: self.resolver.clone(),
            connector: self.connector.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}
