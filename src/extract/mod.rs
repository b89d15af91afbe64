// src/extract/mod.rs
pub mod controller;
pub mod cursor;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod providers;
pub mod publisher;
pub mod scheduler;
pub mod summary;
pub mod types;
pub mod worker;

pub use controller::RunController;
pub use cursor::{FinishReason, PageCursor};
pub use publisher::{Ack, Broker, BrokerMessage, ChannelBroker, Envelope, Publisher};
pub use scheduler::{DoneReason, Next, Scheduler};
pub use summary::{PageFailure, RunState, RunSummary};
pub use types::{Assignment, RawPage, RawRecord, SourceClient};
pub use worker::{RetryPolicy, SourceClients, WorkerPool};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
///
/// Descriptions go to the recorder installed at call time, so this runs from
/// [`Metrics::install`](crate::metrics::Metrics::install), after the recorder exists.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "harvest_pages_fetched_total",
            "Pages fetched successfully, by source."
        );
        describe_counter!(
            "harvest_page_errors_total",
            "Pages that failed after retries, by source."
        );
        describe_counter!(
            "harvest_records_published_total",
            "Records accepted by the broker, by source."
        );
        describe_counter!(
            "harvest_publish_errors_total",
            "Records the broker did not accept, by source."
        );
        describe_counter!("harvest_runs_total", "Finished extraction runs, by state.");
        describe_counter!(
            "harvest_runs_skipped_total",
            "Ticks skipped because a run was still in progress."
        );
        describe_counter!(
            "harvest_records_loaded_total",
            "Movies written by the downstream consumer, by source."
        );
        describe_counter!(
            "harvest_consume_errors_total",
            "Downstream messages dropped, by stage (decode/transform/load)."
        );
        describe_histogram!("harvest_fetch_ms", "Page fetch time in milliseconds.");
        describe_gauge!(
            "harvest_last_run_ts",
            "Unix ts when the last extraction run finished."
        );
    });
}
