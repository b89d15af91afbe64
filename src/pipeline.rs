// src/pipeline.rs
//! Downstream consumer: broker messages → Transform → Load.
//!
//! Delivery is at-least-once, so the same key can arrive twice; loaders are
//! keyed and the consumer only counts what it saw.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extract::publisher::{BrokerMessage, Envelope};
use crate::load::Loader;
use crate::transform::Transformer;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeStats {
    pub received: u64,
    pub loaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Drain `rx` until the sender side is dropped or `cancel` fires.
///
/// A message that fails to decode, transform or load is logged and counted;
/// it never stops the consumer.
pub async fn consume(
    mut rx: mpsc::Receiver<BrokerMessage>,
    transformer: Arc<dyn Transformer>,
    loader: Arc<dyn Loader>,
    cancel: CancellationToken,
) -> ConsumeStats {
    let mut stats = ConsumeStats::default();
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            m = rx.recv() => match m {
                Some(m) => m,
                None => break,
            },
        };
        stats.received += 1;

        let envelope: Envelope = match serde_json::from_slice(&msg.payload) {
            Ok(e) => e,
            Err(e) => {
                stats.failed += 1;
                counter!("harvest_consume_errors_total", "stage" => "decode").increment(1);
                warn!(topic = %msg.topic, key = %msg.key, error = %e, "undecodable envelope");
                continue;
            }
        };

        let movie = match transformer.transform(&envelope) {
            Ok(Some(m)) => m,
            Ok(None) => {
                stats.skipped += 1;
                debug!(source = %envelope.source_name, page = envelope.page_number, "record skipped");
                continue;
            }
            Err(e) => {
                stats.failed += 1;
                counter!("harvest_consume_errors_total", "stage" => "transform").increment(1);
                warn!(source = %envelope.source_name, page = envelope.page_number, error = %e, "transform failed");
                continue;
            }
        };

        match loader.load(movie).await {
            Ok(()) => {
                stats.loaded += 1;
                counter!("harvest_records_loaded_total", "source" => envelope.source_name.clone())
                    .increment(1);
            }
            Err(e) => {
                stats.failed += 1;
                counter!("harvest_consume_errors_total", "stage" => "load").increment(1);
                warn!(source = %envelope.source_name, loader = loader.name(), error = %e, "load failed");
            }
        }
    }
    info!(
        received = stats.received,
        loaded = stats.loaded,
        skipped = stats.skipped,
        failed = stats.failed,
        "consumer stopped"
    );
    stats
}
