//! Configuration validation logic.

use url::Url;

use super::TlsConfig;

/// The realtime credential is mandatory; the server refuses to start without it.
pub fn validate_api_key(api_key: &Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    match api_key {
        Some(key) if !key.trim().is_empty() => Ok(()),
        _ => Err("OPENAI_API_KEY is required (set it in the environment or realtime.api_key in YAML)".into()),
    }
}

pub fn validate_realtime_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Url::parse(url).map_err(|e| format!("Invalid REALTIME_URL '{url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!("REALTIME_URL must use ws:// or wss://, got {other}://").into()),
    }
}

pub fn validate_agent_config_url(
    url: &Option<String>,
    timeout_seconds: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(url) = url else {
        return Ok(());
    };
    let parsed = Url::parse(url).map_err(|e| format!("Invalid AGENT_CONFIG_URL '{url}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!(
            "AGENT_CONFIG_URL must use http:// or https://, got {}://",
            parsed.scheme()
        )
        .into());
    }
    if timeout_seconds == 0 {
        return Err("AGENT_CONFIG_TIMEOUT_SECONDS must be greater than zero".into());
    }
    Ok(())
}

pub fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(tls) = tls else {
        return Ok(());
    };
    if !tls.cert_path.exists() {
        return Err(format!("TLS certificate not found: {}", tls.cert_path.display()).into());
    }
    if !tls.key_path.exists() {
        return Err(format!("TLS key not found: {}", tls.key_path.display()).into());
    }
    Ok(())
}

pub fn validate_limits(max_concurrent_calls: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    if max_concurrent_calls == Some(0) {
        return Err("MAX_CONCURRENT_CALLS must be greater than zero when set".into());
    }
    Ok(())
}
