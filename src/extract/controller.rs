// src/extract/controller.rs
//! Run controller: one extraction run per tick, never two at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::RunConfig;
use crate::error::{ConfigError, HarvestError};
use crate::extract::publisher::Publisher;
use crate::extract::scheduler::Scheduler;
use crate::extract::summary::{RunState, RunSummary};
use crate::extract::worker::{SourceClients, WorkerPool};

pub struct RunController {
    config: Arc<RunConfig>,
    clients: Arc<SourceClients>,
    publisher: Arc<Publisher>,
    pool: WorkerPool,
    running: AtomicBool,
    run_seq: AtomicU64,
    state: RwLock<RunState>,
    last_summary: RwLock<Option<RunSummary>>,
    shutdown: CancellationToken,
}

/// Clears the running flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RunController {
    /// Every configured source needs a client.
    pub fn new(
        config: RunConfig,
        clients: SourceClients,
        publisher: Publisher,
    ) -> Result<Self, HarvestError> {
        for src in &config.sources {
            if !clients.contains_key(&src.name) {
                return Err(ConfigError::InvalidSource {
                    source_name: src.name.clone(),
                    reason: "no client registered for source".into(),
                }
                .into());
            }
        }
        let pool = WorkerPool::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            clients: Arc::new(clients),
            publisher: Arc::new(publisher),
            pool,
            running: AtomicBool::new(false),
            run_seq: AtomicU64::new(0),
            state: RwLock::new(RunState::Idle),
            last_summary: RwLock::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.read().clone()
    }

    /// Cooperative stop: workers finish their current page and exit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Execute one run. Returns `Ok(None)` when a run is already in progress
    /// (the tick is skipped, not queued).
    pub async fn tick(&self) -> Result<Option<RunSummary>, HarvestError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            counter!("harvest_runs_skipped_total").increment(1);
            debug!("previous run still in progress; tick skipped");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        if self.shutdown.is_cancelled() {
            return Ok(None);
        }

        let run_id = self.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.write() = RunState::Running;
        info!(
            run_id,
            sources = self.config.sources.len(),
            workers = self.pool.worker_count(),
            "extraction run started"
        );

        let scheduler = Arc::new(Scheduler::from_config(
            &self.config,
            self.shutdown.child_token(),
        ));
        let result = self
            .pool
            .run(
                Arc::clone(&scheduler),
                Arc::clone(&self.clients),
                Arc::clone(&self.publisher),
            )
            .await;

        let mut summary = match result {
            Ok(s) => s,
            Err(e) => {
                *self.state.write() = RunState::PartialFailure;
                error!(run_id, error = %e, "extraction run aborted");
                return Err(e);
            }
        };
        summary.run_id = run_id;

        counter!("harvest_runs_total", "state" => summary.state.as_str()).increment(1);
        gauge!("harvest_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            run_id,
            state = summary.state.as_str(),
            pages = summary.pages_fetched,
            published = summary.records_published,
            errors = summary.error_count(),
            quota_reached = summary.quota_reached,
            "extraction run finished"
        );

        *self.state.write() = summary.state;
        *self.last_summary.write() = Some(summary.clone());
        Ok(Some(summary))
    }

    /// Tick every `extractIntervalSeconds` until shutdown.
    ///
    /// Each tick runs in its own task so a long run makes later ticks observe
    /// `Running` and skip. On shutdown the in-flight run is drained before the
    /// task returns. A fatal run error cancels the controller and is returned.
    pub fn spawn_interval(self: Arc<Self>) -> JoinHandle<Result<(), HarvestError>> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.extract_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs: JoinSet<Result<Option<RunSummary>, HarvestError>> = JoinSet::new();
            let mut fatal = None;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let ctl = Arc::clone(&self);
                        runs.spawn(async move { ctl.tick().await });
                    }
                    Some(done) = runs.join_next(), if !runs.is_empty() => {
                        if let Some(e) = run_error(done) {
                            fatal = Some(e);
                            self.shutdown.cancel();
                            break;
                        }
                    }
                }
            }

            while let Some(done) = runs.join_next().await {
                if let Some(e) = run_error(done) {
                    fatal.get_or_insert(e);
                }
            }
            info!("interval trigger stopped");
            match fatal {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

fn run_error(
    done: Result<Result<Option<RunSummary>, HarvestError>, tokio::task::JoinError>,
) -> Option<HarvestError> {
    match done {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(e),
        Err(e) => Some(HarvestError::WorkerJoin(e.to_string())),
    }
}
