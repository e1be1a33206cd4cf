//! Agent profile lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use super::profile::AgentProfile;
use crate::core::telephony::RoutingAttributes;

const USER_AGENT: &str = concat!("callbridge/", env!("CARGO_PKG_VERSION"));

/// Errors from the agent profile lookup. Never fatal to a call.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid resolver configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Agent config request timed out")]
    Timeout,

    #[error("Agent config request failed: {0}")]
    Request(String),

    #[error("Agent config service returned {0}")]
    Status(u16),

    #[error("Failed to decode agent config: {0}")]
    Decode(String),
}

/// Looks up the personalization bundle for a call.
#[async_trait]
pub trait AgentConfigResolver: Send + Sync {
    /// `Ok(None)` means no profile exists for these attributes.
    async fn resolve(
        &self,
        routing: &RoutingAttributes,
    ) -> Result<Option<AgentProfile>, ResolveError>;
}

/// Resolver used when no lookup service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAgentConfigResolver;

#[async_trait]
impl AgentConfigResolver for NoopAgentConfigResolver {
    async fn resolve(
        &self,
        _routing: &RoutingAttributes,
    ) -> Result<Option<AgentProfile>, ResolveError> {
        Ok(None)
    }
}

/// Resolver backed by `GET <base>?to=<number>&agentId=<id>`.
#[derive(Debug, Clone)]
pub struct HttpAgentConfigResolver {
    base_url: Url,
    client: Client,
}

impl HttpAgentConfigResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ResolveError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ResolveError::InvalidConfiguration(format!("{base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ResolveError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { base_url, client })
    }

    fn lookup_url(&self, routing: &RoutingAttributes) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(to) = routing.to.as_deref() {
                query.append_pair("to", to);
            }
            if let Some(agent_id) = routing.agent_id.as_deref() {
                query.append_pair("agentId", agent_id);
            }
        }
        url
    }
}

#[async_trait]
impl AgentConfigResolver for HttpAgentConfigResolver {
    async fn resolve(
        &self,
        routing: &RoutingAttributes,
    ) -> Result<Option<AgentProfile>, ResolveError> {
        if routing.is_empty() {
            tracing::debug!("No routing attributes, skipping agent config lookup");
            return Ok(None);
        }

        let url = self.lookup_url(routing);
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ResolveError::Timeout
            } else {
                ResolveError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let profile = response
            .json::<AgentProfile>()
            .await
            .map_err(|e| ResolveError::Decode(e.to_string()))?;
        Ok(Some(profile))
    }
}
