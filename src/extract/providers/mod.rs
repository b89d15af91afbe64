// src/extract/providers/mod.rs
pub mod omdb;
pub mod tmdb;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::{RunConfig, SourceKind, SourceSpec};
use crate::error::{ConfigError, UpstreamError};
use crate::extract::types::{RawRecord, SourceClient};
use crate::extract::worker::SourceClients;

pub use omdb::OmdbClient;
pub use tmdb::TmdbClient;

const USER_AGENT: &str = concat!("movie-harvester/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by all sources of a process.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout.min(Duration::from_secs(4)))
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::InvalidSource {
            source_name: "*".into(),
            reason: format!("http client: {e}"),
        })
}

/// One client per configured source, keyed by source name.
pub fn build_clients(cfg: &RunConfig) -> Result<SourceClients, ConfigError> {
    let http = http_client(cfg.http_timeout())?;
    let mut out = SourceClients::new();
    for spec in &cfg.sources {
        let client: Arc<dyn SourceClient> = match spec.kind {
            SourceKind::Tmdb => Arc::new(TmdbClient::new(spec, http.clone())?),
            SourceKind::Omdb => Arc::new(OmdbClient::new(spec, http.clone())?),
        };
        out.insert(spec.name.clone(), client);
    }
    Ok(out)
}

pub(crate) fn header_map(spec: &SourceSpec) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for (k, v) in &spec.auth_headers {
        let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| ConfigError::InvalidSource {
            source_name: spec.name.clone(),
            reason: format!("header name {k:?}: {e}"),
        })?;
        let mut value = HeaderValue::from_str(v).map_err(|e| ConfigError::InvalidSource {
            source_name: spec.name.clone(),
            reason: format!("header {k:?}: {e}"),
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

/// GET with page query, classify failures, return the raw body.
pub(crate) async fn get_page_body(
    http: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
    query: &[(String, String)],
) -> Result<String, UpstreamError> {
    let resp = http
        .get(url)
        .headers(headers.clone())
        .query(query)
        .send()
        .await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let hint: String = body.chars().take(200).collect();
        return Err(UpstreamError::from_status(status.as_u16(), hint.trim()));
    }
    Ok(body)
}

/// Keep only JSON objects from an upstream result list.
pub(crate) fn object_records(values: Vec<serde_json::Value>) -> Vec<RawRecord> {
    values
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::Object(m) => Some(m),
            _ => None,
        })
        .collect()
}
