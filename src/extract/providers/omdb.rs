// src/extract/providers/omdb.rs
//! OMDB search: result counts instead of page counts, ten results per page,
//! and errors reported in-band with HTTP 200 (`"Response": "False"`).

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::config::SourceSpec;
use crate::error::{ConfigError, UpstreamError};
use crate::extract::providers::{get_page_body, header_map, object_records};
use crate::extract::types::{RawPage, SourceClient};

pub const OMDB_PAGE_SIZE: u64 = 10;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(rename = "Search", default)]
    search: Vec<serde_json::Value>,
    #[serde(rename = "totalResults", default)]
    total_results: Option<String>,
    #[serde(rename = "Response", default)]
    response: Option<String>,
    #[serde(rename = "Error", default)]
    error: Option<String>,
}

pub struct OmdbClient {
    name: String,
    url: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    http: reqwest::Client,
}

/// Convert a total result count into a page count.
pub fn pages_for_results(total_results: u64) -> u32 {
    let pages = total_results.div_ceil(OMDB_PAGE_SIZE);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

impl OmdbClient {
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
        let parsed: SearchPage = serde_json::from_str(body)
            .map_err(|e| UpstreamError::fatal(format!("omdb page {page_number}: {e}")))?;

        let ok = parsed
            .response
            .as_deref()
            .map_or(true, |r| r.eq_ignore_ascii_case("true"));
        if !ok {
            let msg = parsed.error.unwrap_or_else(|| "unknown error".into());
            // Past the end of the result set OMDB answers "Movie not found!".
            if msg.to_ascii_lowercase().contains("not found") {
                return Ok(RawPage {
                    source_name: self.name.clone(),
                    page_number,
                    records: Vec::new(),
                    is_last_page: true,
                    total_pages: None,
                });
            }
            if msg.to_ascii_lowercase().contains("limit") {
                return Err(UpstreamError::Transient {
                    status: None,
                    reason: format!("omdb: {msg}"),
                });
            }
            return Err(UpstreamError::fatal(format!("omdb: {msg}")));
        }

        let total = parsed
            .total_results
            .as_deref()
            .and_then(|t| t.trim().parse::<u64>().ok())
            .map(pages_for_results);
        let records = object_records(parsed.search);
        let is_last_page = match total {
            Some(t) => page_number >= t,
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
impl SourceClient for OmdbClient {
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
