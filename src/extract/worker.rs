// src/extract/worker.rs
//! Fixed-size pool of fetch workers sharing one [`Scheduler`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::{FailureKind, HarvestError, UpstreamError};
use crate::extract::publisher::Publisher;
use crate::extract::scheduler::Scheduler;
use crate::extract::summary::{PageFailure, RunSummary, WorkerReport};
use crate::extract::types::{Assignment, RawPage, SourceClient};

/// Source name → client.
pub type SourceClients = HashMap<String, Arc<dyn SourceClient>>;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one, for transient errors only.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Exponential: backoff, 2×backoff, 4×backoff, ...
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * (1u32 << (attempt.saturating_sub(1)).min(10))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    worker_count: usize,
    retry: RetryPolicy,
}

impl WorkerPool {
    pub fn new(worker_count: usize, retry: RetryPolicy) -> Self {
        Self {
            worker_count: worker_count.max(1),
            retry,
        }
    }

    pub fn from_config(cfg: &RunConfig) -> Self {
        Self::new(
            cfg.worker_count as usize,
            RetryPolicy {
                max_retries: cfg.max_fetch_retries,
                backoff: cfg.retry_backoff(),
            },
        )
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run all workers to completion and join them.
    ///
    /// Page and publish failures end up in the summary. A worker that fails
    /// to join (panic) stops the run; the remaining workers are joined and the
    /// crash is returned as an error.
    pub async fn run(
        &self,
        scheduler: Arc<Scheduler>,
        clients: Arc<SourceClients>,
        publisher: Arc<Publisher>,
    ) -> Result<RunSummary, HarvestError> {
        let started_at = Utc::now();
        let mut set = JoinSet::new();
        for id in 0..self.worker_count {
            let scheduler = Arc::clone(&scheduler);
            let clients = Arc::clone(&clients);
            let publisher = Arc::clone(&publisher);
            let retry = self.retry;
            set.spawn(async move { worker_loop(id, scheduler, clients, publisher, retry).await });
        }

        let mut total = WorkerReport::default();
        let mut join_error = None;
        while let Some(res) = set.join_next().await {
            match res {
                Ok(report) => total.merge(report),
                Err(e) => {
                    tracing::error!(error = %e, "worker crashed; stopping the run");
                    // The crashed page never completes, so waiting workers
                    // must be released explicitly.
                    scheduler.stop_token().cancel();
                    join_error.get_or_insert(e.to_string());
                }
            }
        }
        if let Some(e) = join_error {
            return Err(HarvestError::WorkerJoin(e));
        }

        Ok(total.into_summary(
            started_at,
            scheduler.quota_reached(),
            scheduler.was_stopped(),
        ))
    }
}

async fn worker_loop(
    id: usize,
    scheduler: Arc<Scheduler>,
    clients: Arc<SourceClients>,
    publisher: Arc<Publisher>,
    retry: RetryPolicy,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    debug!(worker = id, "worker started");

    'assignments: while let Some(a) = scheduler.next_assignment().await {
        let Some(client) = clients.get(&a.source_name) else {
            record_page_failure(
                &scheduler,
                &mut report,
                &a,
                &UpstreamError::fatal("no client configured for source"),
                1,
            );
            continue;
        };

        let t0 = Instant::now();
        let fetched = fetch_with_retry(client.as_ref(), &a, retry, &scheduler).await;
        histogram!("harvest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let page = match fetched {
            Ok(page) => page,
            Err((e, attempts)) => {
                record_page_failure(&scheduler, &mut report, &a, &e, attempts);
                continue;
            }
        };

        scheduler.complete_page(&a, &page);
        report.page_fetched(&a.source_name);
        counter!("harvest_pages_fetched_total", "source" => a.source_name.clone()).increment(1);
        debug!(
            worker = id,
            source = %a.source_name,
            page = a.page_number,
            records = page.records.len(),
            last = page.is_last_page,
            "page fetched"
        );

        // Records of one page go out strictly in fetched order.
        for (index, record) in page.records.into_iter().enumerate() {
            if !scheduler.try_reserve_message() {
                debug!(worker = id, "message budget spent; worker stopping");
                break 'assignments;
            }
            match publisher
                .publish(&a.source_name, a.page_number, index, record)
                .await
            {
                Ok(_) => {
                    scheduler.confirm_message();
                    report.records_published += 1;
                    counter!("harvest_records_published_total", "source" => a.source_name.clone())
                        .increment(1);
                }
                Err(e) => {
                    scheduler.release_message();
                    counter!("harvest_publish_errors_total", "source" => a.source_name.clone())
                        .increment(1);
                    warn!(
                        error = %e,
                        source = %a.source_name,
                        page = a.page_number,
                        index,
                        "record publish failed"
                    );
                    report.failure(
                        &a.source_name,
                        PageFailure {
                            page_number: a.page_number,
                            record_index: Some(index),
                            kind: FailureKind::Publish,
                            attempts: if e.is_connection() { 2 } else { 1 },
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    debug!(worker = id, "worker finished");
    report
}

/// Fetch one page, retrying transient failures up to the policy bound.
/// Returns the last error together with the number of attempts made.
async fn fetch_with_retry(
    client: &dyn SourceClient,
    a: &Assignment,
    retry: RetryPolicy,
    scheduler: &Scheduler,
) -> Result<RawPage, (UpstreamError, u32)> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match client.fetch_page(a.page_number).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_transient() && attempt <= retry.max_retries => {
                debug!(
                    error = %e,
                    source = %a.source_name,
                    page = a.page_number,
                    attempt,
                    "transient upstream error; retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(retry.delay(attempt)) => {}
                    _ = scheduler.stop_token().cancelled() => return Err((e, attempt)),
                }
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

fn record_page_failure(
    scheduler: &Scheduler,
    report: &mut WorkerReport,
    a: &Assignment,
    e: &UpstreamError,
    attempts: u32,
) {
    warn!(
        error = %e,
        source = %a.source_name,
        page = a.page_number,
        attempts,
        "page failed"
    );
    counter!("harvest_page_errors_total", "source" => a.source_name.clone()).increment(1);
    report.failure(
        &a.source_name,
        PageFailure {
            page_number: a.page_number,
            record_index: None,
            kind: FailureKind::from(e),
            attempts,
            message: e.to_string(),
        },
    );
    if scheduler.fail_page(a) {
        warn!(source = %a.source_name, "too many consecutive failures; source abandoned for this run");
        report.abandoned_sources.push(a.source_name.clone());
    }
}
