// src/extract/summary.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FailureKind;

/// Lifecycle of the run controller. Terminal states describe the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    /// Completed, but a message or page quota ended the run.
    QuotaExhausted,
    PartialFailure,
    Cancelled,
}

impl RunState {
    /// Terminal state for a drained run. Errors dominate quota; a stop request dominates both.
    pub fn from_outcome(error_count: usize, quota_reached: bool, cancelled: bool) -> Self {
        if cancelled {
            RunState::Cancelled
        } else if error_count > 0 {
            RunState::PartialFailure
        } else if quota_reached {
            RunState::QuotaExhausted
        } else {
            RunState::Completed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::QuotaExhausted => "quota_exhausted",
            RunState::PartialFailure => "partial_failure",
            RunState::Cancelled => "cancelled",
        }
    }
}

/// One recorded failure: a whole page, or a single record of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageFailure {
    pub page_number: u32,
    /// Set for publish failures of a single record.
    pub record_index: Option<usize>,
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_fetched: u64,
    pub pages_by_source: BTreeMap<String, u64>,
    pub records_published: u64,
    pub errors_by_source: BTreeMap<String, Vec<PageFailure>>,
    pub quota_reached: bool,
    /// Sources given up after too many consecutive page failures.
    pub abandoned_sources: Vec<String>,
}

impl RunSummary {
    pub fn error_count(&self) -> usize {
        self.errors_by_source.values().map(Vec::len).sum()
    }

    pub fn errors_for(&self, source: &str) -> &[PageFailure] {
        self.errors_by_source
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Per-worker tally, merged into the run summary when the pool joins.
#[derive(Debug, Default)]
pub(crate) struct WorkerReport {
    pub pages_by_source: BTreeMap<String, u64>,
    pub records_published: u64,
    pub errors_by_source: BTreeMap<String, Vec<PageFailure>>,
    pub abandoned_sources: Vec<String>,
}

impl WorkerReport {
    pub fn page_fetched(&mut self, source: &str) {
        *self.pages_by_source.entry(source.to_string()).or_default() += 1;
    }

    pub fn failure(&mut self, source: &str, failure: PageFailure) {
        self.errors_by_source
            .entry(source.to_string())
            .or_default()
            .push(failure);
    }

    pub fn merge(&mut self, other: WorkerReport) {
        for (src, n) in other.pages_by_source {
            *self.pages_by_source.entry(src).or_default() += n;
        }
        self.records_published += other.records_published;
        for (src, mut errs) in other.errors_by_source {
            self.errors_by_source.entry(src).or_default().append(&mut errs);
        }
        for src in other.abandoned_sources {
            if !self.abandoned_sources.contains(&src) {
                self.abandoned_sources.push(src);
            }
        }
    }

    pub fn into_summary(
        mut self,
        started_at: DateTime<Utc>,
        quota_reached: bool,
        cancelled: bool,
    ) -> RunSummary {
        for errs in self.errors_by_source.values_mut() {
            errs.sort_by_key(|f| (f.page_number, f.record_index));
        }
        let error_count = self.errors_by_source.values().map(Vec::len).sum();
        RunSummary {
            run_id: 0,
            state: RunState::from_outcome(error_count, quota_reached, cancelled),
            started_at,
            finished_at: Utc::now(),
            pages_fetched: self.pages_by_source.values().sum(),
            pages_by_source: self.pages_by_source,
            records_published: self.records_published,
            errors_by_source: self.errors_by_source,
            quota_reached,
            abandoned_sources: self.abandoned_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_precedence() {
        assert_eq!(RunState::from_outcome(0, false, false), RunState::Completed);
        assert_eq!(RunState::from_outcome(0, true, false), RunState::QuotaExhausted);
        assert_eq!(RunState::from_outcome(2, true, false), RunState::PartialFailure);
        assert_eq!(RunState::from_outcome(2, true, true), RunState::Cancelled);
    }

    #[test]
    fn merge_adds_up() {
        let mut a = WorkerReport::default();
        a.page_fetched("tmdb");
        a.records_published = 3;
        let mut b = WorkerReport::default();
        b.page_fetched("tmdb");
        b.page_fetched("omdb");
        b.records_published = 2;
        b.failure(
            "omdb",
            PageFailure {
                page_number: 4,
                record_index: None,
                kind: FailureKind::Fatal,
                attempts: 1,
                message: "HTTP 404".into(),
            },
        );
        a.merge(b);
        let s = a.into_summary(Utc::now(), false, false);
        assert_eq!(s.pages_fetched, 3);
        assert_eq!(s.records_published, 5);
        assert_eq!(s.errors_for("omdb").len(), 1);
        assert_eq!(s.state, RunState::PartialFailure);
    }
}
