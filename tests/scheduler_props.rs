// tests/scheduler_props.rs
//
// Randomized run shapes: whatever the mix of sources, quotas and workers,
// a run never overshoots its budgets and never fetches a page twice.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};

use common::{config, controller, ScriptedSource};
use movie_harvester::extract::{Next, Scheduler};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_runs_respect_quotas_and_pagination() {
    let mut rng = StdRng::seed_from_u64(0x5eed_f11e);
    for round in 0..25 {
        let n_sources = rng.random_range(1..=3usize);
        let names: Vec<String> = (0..n_sources).map(|i| format!("S{i}")).collect();
        let max_pages = rng.random_range(1..=10u32);
        let max_messages = rng.random_range(1..=40u64);
        let workers = rng.random_range(1..=6u32);

        let mut sources = Vec::new();
        let mut last_pages = Vec::new();
        for name in &names {
            let len = rng.random_range(1..=8usize);
            let pages: Vec<usize> = (0..len).map(|_| rng.random_range(1..=4usize)).collect();
            let mut s = ScriptedSource::new(name, pages);
            if rng.random_bool(0.5) {
                s = s.with_total();
            }
            sources.push(Arc::new(s));
            last_pages.push(len as u32);
        }

        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let cfg = config(&name_refs, max_pages, max_messages, workers);
        let (ctl, broker) = controller(cfg, sources.clone());
        let summary = ctl.tick().await.unwrap().unwrap();

        assert!(
            summary.records_published <= max_messages,
            "round {round}: published {} > {max_messages}",
            summary.records_published
        );
        assert_eq!(broker.sent.lock().len() as u64, summary.records_published);

        for (src, last) in sources.iter().zip(&last_pages) {
            let log = src.fetch_log();
            let unique: HashSet<u32> = log.iter().copied().collect();
            assert_eq!(unique.len(), log.len(), "round {round}: page fetched twice");
            let bound = max_pages.min(*last);
            assert!(
                log.iter().all(|p| *p >= 1 && *p <= bound),
                "round {round}: fetched {log:?} beyond {bound}"
            );
        }
    }
}

#[test]
fn round_robin_follows_configured_order() {
    let s = Scheduler::new(["A", "B", "C"], 10, 1, 100, 5, CancellationToken::new());
    let mut order = Vec::new();
    // Without known totals each source allows one page in flight.
    for _ in 0..3 {
        match s.try_next() {
            Next::Assigned(a) => order.push((a.source_name, a.page_number)),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(
        order,
        vec![
            ("A".to_string(), 1u32),
            ("B".to_string(), 1),
            ("C".to_string(), 1)
        ]
    );
    assert_eq!(s.try_next(), Next::Pending);
}

#[test]
fn message_budget_never_overshoots() {
    let s = Scheduler::new(["A"], 10, 1, 3, 5, CancellationToken::new());
    let granted = (0..10).filter(|_| s.try_reserve_message()).count();
    assert_eq!(granted, 3);
    s.release_message();
    assert!(s.try_reserve_message());
    for _ in 0..3 {
        s.confirm_message();
    }
    assert_eq!(s.published(), 3);
    assert_eq!(s.remaining_budget(), 0);
    assert!(s.quota_reached());
}
