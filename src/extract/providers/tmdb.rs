// src/extract/providers/tmdb.rs
//! TMDB `discover/movie` style endpoints: page-number pagination with `total_pages`.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::config::SourceSpec;
use crate::error::{ConfigError, UpstreamError};
use crate::extract::providers::{get_page_body, header_map, object_records};
use crate::extract::types::{RawPage, SourceClient};

/// TMDB refuses pages above 500 regardless of `total_pages`.
pub const TMDB_MAX_PAGE: u32 = 500;

#[derive(Debug, Deserialize)]
struct DiscoverPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    total_pages: Option<u32>,
}

pub struct TmdbClient {
    name: String,
    url: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    http: reqwest::Client,
}

impl TmdbClient {
    pub fn new(spec: &SourceSpec, http: reqwest::Client) -> Result<Self, ConfigError> {
        Ok(Self {
            name: spec.name.clone(),
            url: spec.base_url.clone(),
            headers: header_map(spec)?,
            query: spec
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            http,
        })
    }

    fn parse(&self, page_number: u32, body: &str) -> Result<RawPage, UpstreamError> {
        let parsed: DiscoverPage = serde_json::from_str(body)
            .map_err(|e| UpstreamError::fatal(format!("tmdb page {page_number}: {e}")))?;
        let page = parsed.page.unwrap_or(page_number);
        let total = parsed.total_pages.map(|t| t.min(TMDB_MAX_PAGE));
        let records = object_records(parsed.results);
        let is_last_page = match total {
            Some(t) => page >= t,
            None => records.is_empty(),
        };
        Ok(RawPage {
            source_name: self.name.clone(),
            page_number,
            records,
            is_last_page,
            total_pages: total,
        })
    }
}

#[async_trait]
impl SourceClient for TmdbClient {
    async fn fetch_page(&self, page_number: u32) -> Result<RawPage, UpstreamError> {
        let mut query = self.query.clone();
        query.push(("page".to_string(), page_number.to_string()));
        let body = get_page_body(&self.http, &self.url, &self.headers, &query).await?;
        self.parse(page_number, &body)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
