// src/extract/cursor.rs
use serde::Serialize;

/// Why a cursor stopped handing out pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Upstream reported its last page (or an implicit short page).
    LastPage,
    /// `maxPagesPerSource` reached before pagination ended.
    PageQuota,
    /// Too many consecutive page failures.
    Abandoned,
}

/// Pagination state for one source during one run.
///
/// Only the scheduler mutates cursors, always under its lock.
#[derive(Debug, Clone)]
pub struct PageCursor {
    pub source_name: String,
    next_page: u32,
    total_pages: Option<u32>,
    exhausted: bool,
    finish: Option<FinishReason>,
    in_flight: u32,
    consecutive_failures: u32,
    pages_issued: u32,
}

impl PageCursor {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            next_page: 1,
            total_pages: None,
            exhausted: false,
            finish: None,
            in_flight: 0,
            consecutive_failures: 0,
            pages_issued: 0,
        }
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn pages_issued(&self) -> u32 {
        self.pages_issued
    }

    /// Finished cursors never hand out pages again. Marks page-quota
    /// exhaustion lazily once the quota is passed and nothing is in flight.
    pub fn refresh(&mut self, max_pages: u32) {
        if self.exhausted {
            return;
        }
        if let Some(total) = self.total_pages {
            if self.next_page > total && self.in_flight == 0 {
                self.finish(FinishReason::LastPage);
                return;
            }
        }
        if self.next_page > max_pages && self.in_flight == 0 {
            self.finish(FinishReason::PageQuota);
        }
    }

    /// Can a page be issued right now?
    ///
    /// Without a known total the cursor allows one page in flight, so a page
    /// past the last one is never issued.
    pub fn assignable(&self, max_pages: u32) -> bool {
        if self.exhausted || self.next_page > max_pages {
            return false;
        }
        match self.total_pages {
            Some(total) => self.next_page <= total,
            None => self.in_flight == 0,
        }
    }

    /// Could this cursor still hand out a page, now or after in-flight pages return?
    pub fn is_open(&self, max_pages: u32) -> bool {
        !self.exhausted
            && self.next_page <= max_pages
            && self.total_pages.map_or(true, |t| self.next_page <= t)
    }

    /// Claim `next_page` and advance. Caller checked [`assignable`](Self::assignable).
    pub fn claim(&mut self) -> u32 {
        let page = self.next_page;
        self.next_page += 1;
        self.in_flight += 1;
        self.pages_issued += 1;
        page
    }

    /// Record a fetched page. `nextPage` never moves backwards.
    pub fn record_fetched(&mut self, page: u32, total_pages: Option<u32>, is_last: bool) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.consecutive_failures = 0;
        if let Some(total) = total_pages {
            // Drift: keep the smallest total seen so no later page overshoots it.
            self.total_pages = Some(self.total_pages.map_or(total, |t| t.min(total)));
        }
        if is_last {
            let capped = self.total_pages.map_or(page, |t| t.min(page));
            self.total_pages = Some(capped);
            self.finish(FinishReason::LastPage);
        }
    }

    /// Record a failed page. Returns true when the cursor got abandoned.
    pub fn record_failed(&mut self, max_consecutive_failures: u32) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.consecutive_failures += 1;
        if self.consecutive_failures >= max_consecutive_failures && !self.exhausted {
            self.finish(FinishReason::Abandoned);
            return true;
        }
        false
    }

    fn finish(&mut self, reason: FinishReason) {
        if !self.exhausted {
            self.exhausted = true;
            self.finish = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_total_allows_one_in_flight() {
        let mut c = PageCursor::new("a");
        assert!(c.assignable(10));
        assert_eq!(c.claim(), 1);
        assert!(!c.assignable(10));
        c.record_fetched(1, None, false);
        assert!(c.assignable(10));
        assert_eq!(c.claim(), 2);
    }

    #[test]
    fn known_total_allows_parallel_up_to_total() {
        let mut c = PageCursor::new("a");
        c.claim();
        c.record_fetched(1, Some(3), false);
        assert_eq!(c.claim(), 2);
        assert!(c.assignable(10));
        assert_eq!(c.claim(), 3);
        assert!(!c.assignable(10));
    }

    #[test]
    fn last_page_exhausts() {
        let mut c = PageCursor::new("a");
        c.claim();
        c.record_fetched(1, None, true);
        assert!(c.is_exhausted());
        assert_eq!(c.finish_reason(), Some(FinishReason::LastPage));
        assert_eq!(c.next_page(), 2);
    }

    #[test]
    fn page_quota_finishes_after_drain() {
        let mut c = PageCursor::new("a");
        c.claim();
        c.record_fetched(1, Some(50), false);
        c.claim();
        assert!(!c.assignable(2));
        c.refresh(2);
        assert!(!c.is_exhausted(), "page 2 still in flight");
        c.record_fetched(2, Some(50), false);
        c.refresh(2);
        assert_eq!(c.finish_reason(), Some(FinishReason::PageQuota));
    }

    #[test]
    fn consecutive_failures_abandon() {
        let mut c = PageCursor::new("a");
        c.claim();
        assert!(!c.record_failed(2));
        c.claim();
        assert!(c.record_failed(2));
        assert_eq!(c.finish_reason(), Some(FinishReason::Abandoned));
    }
}
