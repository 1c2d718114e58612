use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

// ── Defaults ─────────────────────────────────────────────────────────────────

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY (or API_KEY) must be set")]
    MissingApiKey,
    #[error("invalid GEMINI_BASE_URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid BASIRAT_BIND_ADDR: {0}")]
    InvalidBindAddr(String),
    #[error("{key} must be a positive integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: Url,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
    pub insecure_ssl: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("GEMINI_API_KEY")
            .or_else(|| get("API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        let model = get("BASIRAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let raw_base = get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = parse_base_url(&raw_base)?;

        let raw_addr = get("BASIRAT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(raw_addr.clone()))?;

        let max_upload_bytes = match get("BASIRAT_MAX_UPLOAD_BYTES") {
            Some(v) => parse_positive("BASIRAT_MAX_UPLOAD_BYTES", &v)? as usize,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let session_ttl = match get("BASIRAT_SESSION_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_positive("BASIRAT_SESSION_TTL_SECS", &v)?),
            None => Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        };

        let insecure_ssl = get("BASIRAT_INSECURE_SSL").as_deref() == Some("1");

        Ok(Self {
            api_key,
            model,
            base_url,
            bind_addr,
            max_upload_bytes,
            session_ttl,
            insecure_ssl,
        })
    }

    #[cfg(test)]
    pub fn for_endpoint(api_key: &str, base_url: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some(api_key.to_string()),
            "GEMINI_BASE_URL" => Some(base_url.to_string()),
            _ => None,
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidBaseUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        }),
    }
}
