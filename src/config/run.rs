// src/config/run.rs
//! Run configuration: loaded once, validated before the first run, immutable afterwards.
//!
//! Sources of truth, in order:
//! 1) `$HARVEST_CONFIG_PATH` (TOML or JSON; must exist when set)
//! 2) `config/harvest.toml`
//! 3) `config/harvest.json`
//! 4) environment only (`WORKERS`, `MAX_PAGES`, `TMDB_HEADERS`, `OMDB_API_KEY`, ...)
//!
//! Numeric environment variables override file values in every mode.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG_PATH";

const DEFAULT_TMDB_URL: &str = "https://api.themoviedb.org/3/discover/movie";
const DEFAULT_OMDB_URL: &str = "http://www.omdbapi.com";
const DEFAULT_OMDB_SEARCH: &str = "movie";

/// Upper bound for `workerCount`; each worker is a spawned task.
pub const MAX_WORKERS: u32 = 1024;

fn default_workers() -> u32 {
    10
}
fn default_max_pages() -> u32 {
    200
}
fn default_page_per_scan() -> u32 {
    1
}
fn default_interval() -> u64 {
    15
}
fn default_max_messages() -> u64 {
    10_000
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_consecutive_failures() -> u32 {
    5
}
fn default_http_timeout() -> u64 {
    10
}
fn default_security_protocol() -> String {
    "SASL_SSL".to_string()
}
fn default_sasl_mechanism() -> String {
    "SCRAM-SHA-256".to_string()
}
fn default_channel_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Tmdb,
    Omdb,
}

/// One upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    pub base_url: String,
    #[serde(default)]
    pub auth_headers: BTreeMap<String, String>,
    /// Static query parameters sent with every page request.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl SourceSpec {
    /// Broker topic for this source; `<name>-api` unless configured.
    pub fn topic(&self) -> String {
        self.topic
            .clone()
            .unwrap_or_else(|| format!("{}-api", self.name.to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process channel drained by the downstream transform/load consumer.
    #[default]
    Channel,
    Kafka,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    #[serde(default = "default_sasl_mechanism")]
    pub sasl_mechanism: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Channel,
            hostname: None,
            username: None,
            password: None,
            security_protocol: default_security_protocol(),
            sasl_mechanism: default_sasl_mechanism(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// Credentials never reach the logs.
impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("kind", &self.kind)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_workers")]
    pub worker_count: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_source: u32,
    #[serde(default = "default_page_per_scan")]
    pub page_per_scan: u32,
    #[serde(default = "default_interval")]
    pub extract_interval_secs: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: u64,
    #[serde(default = "default_fetch_retries")]
    pub max_fetch_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub listen_addr: Option<String>,
}

impl RunConfig {
    /// Defaults with the given sources; handy for tests and embedding.
    pub fn with_sources(sources: Vec<SourceSpec>) -> Self {
        Self {
            worker_count: default_workers(),
            max_pages_per_source: default_max_pages(),
            page_per_scan: default_page_per_scan(),
            extract_interval_secs: default_interval(),
            max_messages: default_max_messages(),
            max_fetch_retries: default_fetch_retries(),
            retry_backoff_ms: default_backoff_ms(),
            max_consecutive_failures: default_consecutive_failures(),
            http_timeout_secs: default_http_timeout(),
            sources,
            broker: BrokerConfig::default(),
            listen_addr: None,
        }
    }

    pub fn extract_interval(&self) -> Duration {
        Duration::from_secs(self.extract_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Resolve config using env var + fallbacks (see module docs), then validate.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(&p);
            if !pb.exists() {
                return Err(ConfigError::File {
                    path: p,
                    reason: format!("{ENV_CONFIG_PATH} points to a non-existent path"),
                });
            }
            return Self::load_from_file(&pb);
        }
        for candidate in ["config/harvest.toml", "config/harvest.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
        }
        Self::from_env()
    }

    /// Load a TOML or JSON file, resolve `env:` references, apply env overrides, validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let file_err = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut cfg: RunConfig = if ext == "json" {
            serde_json::from_str(&content).map_err(|e| file_err(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| file_err(e.to_string()))?
        };

        cfg.resolve_env_refs()?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment-only configuration with the two stock sources (TMDB discover, OMDB search).
    pub fn from_env() -> Result<Self, ConfigError> {
        let tmdb_headers_raw =
            env_non_empty("TMDB_HEADERS").ok_or(ConfigError::Missing("TMDB_HEADERS"))?;
        let auth_headers: BTreeMap<String, String> = serde_json::from_str(&tmdb_headers_raw)
            .map_err(|e| ConfigError::InvalidSource {
                source_name: "tmdb".into(),
                reason: format!("TMDB_HEADERS must be a JSON object of strings: {e}"),
            })?;
        let omdb_key = env_non_empty("OMDB_API_KEY").ok_or(ConfigError::Missing("OMDB_API_KEY"))?;

        let tmdb = SourceSpec {
            name: "tmdb".into(),
            kind: SourceKind::Tmdb,
            base_url: env_non_empty("TMDB_URL").unwrap_or_else(|| DEFAULT_TMDB_URL.into()),
            auth_headers,
            query: BTreeMap::new(),
            topic: env_non_empty("TMDB_TOPIC"),
        };
        let mut omdb_query = BTreeMap::new();
        omdb_query.insert("apikey".to_string(), omdb_key);
        omdb_query.insert(
            "s".to_string(),
            env_non_empty("OMDB_SEARCH").unwrap_or_else(|| DEFAULT_OMDB_SEARCH.into()),
        );
        omdb_query.insert("type".to_string(), "movie".to_string());
        let omdb = SourceSpec {
            name: "omdb".into(),
            kind: SourceKind::Omdb,
            base_url: env_non_empty("OMDB_URL").unwrap_or_else(|| DEFAULT_OMDB_URL.into()),
            auth_headers: BTreeMap::new(),
            query: omdb_query,
            topic: env_non_empty("OMDB_TOPIC"),
        };

        let mut cfg = Self::with_sources(vec![tmdb, omdb]);
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Numeric quotas, broker credentials and listen address from the environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_positive("WORKERS")? {
            self.worker_count = to_u32("WORKERS", v)?;
        }
        if let Some(v) = env_positive("MAX_PAGES")? {
            self.max_pages_per_source = to_u32("MAX_PAGES", v)?;
        }
        if let Some(v) = env_positive("PAGE_PER_SCAN")? {
            self.page_per_scan = to_u32("PAGE_PER_SCAN", v)?;
        }
        if let Some(v) = env_positive("EXTRACT_INTERVAL")? {
            self.extract_interval_secs = v;
        }
        if let Some(v) = env_positive("MAX_MESSAGES")? {
            self.max_messages = v;
        }

        if let Some(host) = env_non_empty("CLOUDKARAFKA_HOSTNAME") {
            self.broker.hostname = Some(host);
            self.broker.kind = BrokerKind::Kafka;
        }
        if let Some(user) = env_non_empty("CLOUDKARAFKA_USERNAME") {
            self.broker.username = Some(user);
        }
        if let Some(pass) = env_non_empty("CLOUDKARAFKA_PASSWORD") {
            self.broker.password = Some(pass);
        }
        if let Some(kind) = env_non_empty("BROKER_KIND") {
            self.broker.kind = match kind.to_ascii_lowercase().as_str() {
                "kafka" => BrokerKind::Kafka,
                "channel" => BrokerKind::Channel,
                other => {
                    return Err(ConfigError::InvalidBroker(format!(
                        "unknown BROKER_KIND {other:?} (expected kafka|channel)"
                    )))
                }
            };
        }
        if let Some(addr) = env_non_empty("HARVEST_LISTEN_ADDR") {
            self.listen_addr = Some(addr);
        }
        Ok(())
    }

    /// Replace `env:NAME` values in headers and query parameters.
    pub fn resolve_env_refs(&mut self) -> Result<(), ConfigError> {
        for src in &mut self.sources {
            for v in src.auth_headers.values_mut().chain(src.query.values_mut()) {
                if let Some(name) = v.strip_prefix("env:") {
                    let name = name.trim();
                    *v = env_non_empty(name)
                        .ok_or_else(|| ConfigError::UnresolvedEnv(name.to_string()))?;
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("workerCount", self.worker_count as u64)?;
        if self.worker_count > MAX_WORKERS {
            return Err(ConfigError::TooLarge {
                field: "workerCount",
                value: self.worker_count as u64,
                max: MAX_WORKERS as u64,
            });
        }
        positive("maxPagesPerSource", self.max_pages_per_source as u64)?;
        positive("pagePerScan", self.page_per_scan as u64)?;
        positive("extractIntervalSeconds", self.extract_interval_secs)?;
        positive("maxMessages", self.max_messages)?;
        positive("maxConsecutiveFailures", self.max_consecutive_failures as u64)?;
        positive("httpTimeoutSecs", self.http_timeout_secs)?;

        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut seen = HashSet::new();
        for src in &self.sources {
            validate_source(src)?;
            if !seen.insert(src.name.as_str()) {
                return Err(ConfigError::DuplicateSource(src.name.clone()));
            }
        }

        let b = &self.broker;
        if b.channel_capacity == 0 {
            return Err(ConfigError::InvalidBroker(
                "channel_capacity must be positive".into(),
            ));
        }
        if b.kind == BrokerKind::Kafka {
            let missing = [&b.hostname, &b.username, &b.password]
                .iter()
                .any(|v| v.as_deref().map(str::trim).unwrap_or_default().is_empty());
            if missing {
                return Err(ConfigError::InvalidBroker(
                    "CLOUDKARAFKA_HOSTNAME, CLOUDKARAFKA_USERNAME, and CLOUDKARAFKA_PASSWORD must be provided"
                        .into(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_source(src: &SourceSpec) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSource {
        source_name: src.name.clone(),
        reason: reason.to_string(),
    };
    if src.name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }
    let url = reqwest::Url::parse(&src.base_url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("base_url must be http(s)"));
    }
    if src.kind == SourceKind::Omdb {
        if src.query.get("apikey").map_or(true, |k| k.trim().is_empty()) {
            return Err(invalid("omdb source requires an `apikey` query parameter"));
        }
        if src.query.get("s").map_or(true, |k| k.trim().is_empty()) {
            return Err(invalid("omdb source requires an `s` search query parameter"));
        }
    }
    Ok(())
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_positive(name: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env_non_empty(name) else {
        return Ok(None);
    };
    let v: i64 = raw.parse().map_err(|_| ConfigError::NotInteger {
        field: name,
        value: raw.clone(),
    })?;
    if v <= 0 {
        return Err(ConfigError::NotPositive { field: name, value: raw });
    }
    Ok(Some(v as u64))
}

fn to_u32(field: &'static str, v: u64) -> Result<u32, ConfigError> {
    u32::try_from(v).map_err(|_| ConfigError::NotInteger {
        field,
        value: v.to_string(),
    })
}
