// src/extract/scheduler.rs
//! Page dispatcher shared by all workers of one run.
//!
//! Holds one [`PageCursor`] per source plus the message budget behind a single
//! lock. The critical section is "read+increment a cursor" or "move the budget",
//! so workers only ever block here for the duration of the lock.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::extract::cursor::{FinishReason, PageCursor};
use crate::extract::types::{Assignment, RawPage};

/// Outcome of a non-blocking assignment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Assigned(Assignment),
    /// Nothing assignable right now, but in-flight pages may open more work.
    Pending,
    Done(DoneReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// Every source is exhausted, over its page quota or abandoned.
    Exhausted,
    MessageQuota,
    Stopped,
}

#[derive(Debug)]
struct State {
    cursors: Vec<PageCursor>,
    rr_next: usize,
    /// Messages neither reserved nor published yet.
    budget: u64,
    reserved: u64,
    published: u64,
    message_quota_hit: bool,
    /// A stop request ended the run while work was still left.
    stopped: bool,
}

#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<State>,
    notify: Notify,
    stop: CancellationToken,
    max_pages: u32,
    page_per_scan: u32,
    max_consecutive_failures: u32,
}

impl Scheduler {
    pub fn new<I, S>(
        source_names: I,
        max_pages: u32,
        page_per_scan: u32,
        max_messages: u64,
        max_consecutive_failures: u32,
        stop: CancellationToken,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cursors = source_names.into_iter().map(PageCursor::new).collect();
        Self {
            state: Mutex::new(State {
                cursors,
                rr_next: 0,
                budget: max_messages,
                reserved: 0,
                published: 0,
                message_quota_hit: false,
                stopped: false,
            }),
            notify: Notify::new(),
            stop,
            max_pages,
            page_per_scan,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Fresh cursors (page 1) for every configured source, in configured order.
    pub fn from_config(cfg: &RunConfig, stop: CancellationToken) -> Self {
        Self::new(
            cfg.sources.iter().map(|s| s.name.clone()),
            cfg.max_pages_per_source,
            cfg.page_per_scan,
            cfg.max_messages,
            cfg.max_consecutive_failures,
            stop,
        )
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Did a worker leave because of a stop request while work was left?
    pub fn was_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Non-blocking assignment request.
    ///
    /// Sources are visited round-robin in configured order, starting after the
    /// source that received the previous assignment.
    ///
    /// After a stop request only a run with work left reports `Stopped`; a run
    /// that already drained keeps its natural outcome.
    pub fn try_next(&self) -> Next {
        let mut st = self.state.lock();
        let max_pages = self.max_pages;
        for c in st.cursors.iter_mut() {
            c.refresh(max_pages);
        }

        if self.stop.is_cancelled() {
            let work_left = st.budget > 0 && st.cursors.iter().any(|c| c.is_open(max_pages));
            if work_left {
                st.stopped = true;
                return Next::Done(DoneReason::Stopped);
            }
        }

        if st.budget == 0 {
            if st.cursors.iter().any(|c| c.is_open(max_pages)) {
                st.message_quota_hit = true;
            }
            return Next::Done(DoneReason::MessageQuota);
        }

        let n = st.cursors.len();
        for step in 0..n {
            let idx = (st.rr_next + step) % n;
            if st.cursors[idx].assignable(max_pages) {
                let page = st.cursors[idx].claim();
                st.rr_next = (idx + 1) % n;
                return Next::Assigned(Assignment {
                    source_index: idx,
                    source_name: st.cursors[idx].source_name.clone(),
                    page_number: page,
                });
            }
        }

        if st.cursors.iter().any(|c| c.is_open(max_pages)) {
            Next::Pending
        } else {
            Next::Done(DoneReason::Exhausted)
        }
    }

    /// Wait for the next assignment; `None` means the worker should exit.
    pub async fn next_assignment(&self) -> Option<Assignment> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion between check and await is not lost.
            notified.as_mut().enable();

            match self.try_next() {
                Next::Assigned(a) => return Some(a),
                Next::Done(_) => return None,
                Next::Pending => {}
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.stop.cancelled() => {}
            }
        }
    }

    /// Record a fetched page. A page with fewer records than `pagePerScan`
    /// counts as the last page even when the upstream does not say so.
    pub fn complete_page(&self, a: &Assignment, page: &RawPage) {
        let short_page = (page.records.len() as u64) < self.page_per_scan as u64;
        let is_last = page.is_last_page || short_page;
        {
            let mut st = self.state.lock();
            if let Some(c) = st.cursors.get_mut(a.source_index) {
                c.record_fetched(a.page_number, page.total_pages, is_last);
            }
        }
        self.notify.notify_waiters();
    }

    /// Record a failed page. Failed pages are never re-queued.
    /// Returns true when the failure made the source give up for this run.
    pub fn fail_page(&self, a: &Assignment) -> bool {
        let abandoned = {
            let mut st = self.state.lock();
            match st.cursors.get_mut(a.source_index) {
                Some(c) => c.record_failed(self.max_consecutive_failures),
                None => false,
            }
        };
        self.notify.notify_waiters();
        abandoned
    }

    /// Reserve one message from the budget before publishing.
    /// Returns false (and flags the quota) once the budget is spent.
    pub fn try_reserve_message(&self) -> bool {
        let mut st = self.state.lock();
        if st.budget == 0 {
            st.message_quota_hit = true;
            return false;
        }
        st.budget -= 1;
        st.reserved += 1;
        true
    }

    /// The reserved message was accepted by the broker.
    pub fn confirm_message(&self) {
        let mut st = self.state.lock();
        st.reserved = st.reserved.saturating_sub(1);
        st.published += 1;
    }

    /// The reserved message was not published; give the slot back.
    pub fn release_message(&self) {
        {
            let mut st = self.state.lock();
            st.reserved = st.reserved.saturating_sub(1);
            st.budget += 1;
        }
        self.notify.notify_waiters();
    }

    pub fn remaining_budget(&self) -> u64 {
        self.state.lock().budget
    }

    pub fn published(&self) -> u64 {
        self.state.lock().published
    }

    /// Did a quota (message or page), rather than natural pagination end, stop the run?
    pub fn quota_reached(&self) -> bool {
        let st = self.state.lock();
        st.message_quota_hit
            || st
                .cursors
                .iter()
                .any(|c| c.finish_reason() == Some(FinishReason::PageQuota))
    }

    /// Snapshot of all cursors, in configured order.
    pub fn cursors(&self) -> Vec<PageCursor> {
        let mut st = self.state.lock();
        let max_pages = self.max_pages;
        for c in st.cursors.iter_mut() {
            c.refresh(max_pages);
        }
        st.cursors.clone()
    }
}
