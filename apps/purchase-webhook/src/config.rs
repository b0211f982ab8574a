use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8788";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "text";
const DEFAULT_WEBHOOK_PATH: &str = "/api/webhooks/purchase";
const DEFAULT_WEBHOOK_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_DOCUMENT_STORE_COLLECTION: &str = "verifiedPurchases";
const DEFAULT_DOCUMENT_STORE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub webhook_secret: Option<String>,
    pub webhook_path: String,
    pub webhook_max_body_bytes: usize,
    pub purchase_store_path: Option<PathBuf>,
    pub document_store_url: Option<String>,
    pub document_store_collection: String,
    pub document_store_token: Option<String>,
    pub document_store_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid BLUEPRINT_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid {name} value '{value}': {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("invalid BLUEPRINT_LOG_FORMAT value '{value}': expected 'text' or 'json'")]
    InvalidLogFormat { value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = non_empty_var("BLUEPRINT_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter = non_empty_var("BLUEPRINT_LOG_FILTER")
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = parse_log_format(
            &non_empty_var("BLUEPRINT_LOG_FORMAT")
                .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string()),
        )?;

        // Blank secrets count as unset so verification fails closed.
        let webhook_secret = non_empty_var("BLUEPRINT_WEBHOOK_SECRET");

        let webhook_path = normalize_route_path(
            &non_empty_var("BLUEPRINT_WEBHOOK_PATH")
                .unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string()),
        );

        let webhook_max_body_bytes = parse_number(
            "BLUEPRINT_WEBHOOK_MAX_BODY_BYTES",
            DEFAULT_WEBHOOK_MAX_BODY_BYTES,
        )?;

        let purchase_store_path = non_empty_var("BLUEPRINT_PURCHASE_STORE_PATH").map(PathBuf::from);

        let document_store_url = non_empty_var("BLUEPRINT_DOCUMENT_STORE_URL")
            .map(|value| value.trim_end_matches('/').to_string());

        let document_store_collection = non_empty_var("BLUEPRINT_DOCUMENT_STORE_COLLECTION")
            .unwrap_or_else(|| DEFAULT_DOCUMENT_STORE_COLLECTION.to_string());

        let document_store_token = non_empty_var("BLUEPRINT_DOCUMENT_STORE_TOKEN");

        let document_store_timeout_ms = parse_number(
            "BLUEPRINT_DOCUMENT_STORE_TIMEOUT_MS",
            DEFAULT_DOCUMENT_STORE_TIMEOUT_MS,
        )?;

        Ok(Self {
            bind_addr,
            log_filter,
            log_format,
            webhook_secret,
            webhook_path,
            webhook_max_body_bytes,
            purchase_store_path,
            document_store_url,
            document_store_collection,
            document_store_token,
            document_store_timeout_ms,
        })
    }

    pub fn webhook_secret_configured(&self) -> bool {
        self.webhook_secret
            .as_deref()
            .is_some_and(|secret| !secret.trim().is_empty())
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_format: LogFormat::Text,
            webhook_secret: Some("blueprint-webhook-test-secret".to_string()),
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            webhook_max_body_bytes: DEFAULT_WEBHOOK_MAX_BODY_BYTES,
            purchase_store_path: None,
            document_store_url: None,
            document_store_collection: DEFAULT_DOCUMENT_STORE_COLLECTION.to_string(),
            document_store_token: None,
            document_store_timeout_ms: DEFAULT_DOCUMENT_STORE_TIMEOUT_MS,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match non_empty_var(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|source| ConfigError::InvalidNumber {
                name,
                value,
                source,
            }),
        None => Ok(default),
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(ConfigError::InvalidLogFormat {
            value: value.to_string(),
        }),
    }
}

fn normalize_route_path(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
