// src/extract/types.rs
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Opaque upstream record (one JSON object from a page's result list).
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// One fetched page. Owned by the worker that fetched it until its records
/// are handed to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPage {
    pub source_name: String,
    pub page_number: u32,
    pub records: Vec<RawRecord>,
    pub is_last_page: bool,
    /// Total page count when the upstream reports one.
    pub total_pages: Option<u32>,
}

/// A (source, page) pair handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub source_index: usize,
    pub source_name: String,
    pub page_number: u32,
}

/// Capability every upstream client provides: fetch one page by number.
///
/// Implementations hide their pagination semantics (page numbers, result
/// offsets, counts) behind this uniform page-number contract.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_page(&self, page_number: u32) -> Result<RawPage, UpstreamError>;
    fn name(&self) -> &str;
}
