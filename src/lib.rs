// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod metrics;
pub mod pipeline;
pub mod transform;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::RunConfig;
pub use crate::error::{ConfigError, HarvestError, PublishError, UpstreamError};
pub use crate::extract::{RunController, RunState, RunSummary};
