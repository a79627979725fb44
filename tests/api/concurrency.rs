use rand::Rng;
use sentinel_adaptive::{
    AdaptiveDegrader, HealthSignal, Outcome, ProbeCoordinator, Rule, ServerMetric, State,
    StateChangeListener, TripCause,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn open_breaker(degrader: &AdaptiveDegrader, resource: &str) {
    degrader
        .registry()
        .set_rule(
            resource,
            Rule {
                retry_timeout_ms: 5,
                min_request_amount: 1,
                ..Rule::new(resource).with_enabled(true)
            },
        )
        .unwrap();
    degrader
        .entry_at(resource, 0)
        .unwrap()
        .exit_at(Outcome::failure(1), 0);
}

#[test]
fn single_flight_probe_across_threads() {
    let degrader = AdaptiveDegrader::new();
    open_breaker(&degrader, "svc");

    let threads = 64;
    let barrier = Arc::new(Barrier::new(threads));
    let admitted = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let degrader = degrader.clone();
            let barrier = Arc::clone(&barrier);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                barrier.wait();
                // the winner hands its entry back, holding the probe until everyone has tried
                let entry = degrader.entry_at("svc", 5).ok();
                if entry.is_some() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
                entry
            })
        })
        .collect();
    let entries: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(entries.len(), 1);
}

#[test]
fn acquire_release_cycles() {
    let probes = Arc::new(ProbeCoordinator::new());
    let degrader = AdaptiveDegrader::new();
    let breaker = degrader.registry().breaker_of("svc").unwrap();
    let id = breaker.id();
    for _ in 0..50 {
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let probes = Arc::clone(&probes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    probes.acquire_probe(id)
                })
            })
            .collect();
        let tokens: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(tokens.len(), 1);
        probes.release_probe(id);
        assert!(!probes.is_probing(id));
    }
    assert_eq!(probes.probe_count(), 1);
}

#[test]
fn trips_once_under_random_interleaving() {
    let degrader = AdaptiveDegrader::new();
    degrader
        .registry()
        .set_rule(
            "svc",
            Rule {
                min_request_amount: 10,
                error_ratio_threshold: 0.3,
                stat_interval_ms: 60_000,
                retry_timeout_ms: 60_000,
                ..Rule::new("svc").with_enabled(true)
            },
        )
        .unwrap();
    let breaker = degrader.registry().breaker_of("svc").unwrap();
    let opened = Arc::new(AtomicUsize::new(0));
    struct Counter(Arc<AtomicUsize>);
    impl StateChangeListener for Counter {
        fn on_transform_to_closed(&self, _: State, _: Arc<Rule>) {}
        fn on_transform_to_open(&self, _: State, _: Arc<Rule>, _: TripCause) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_transform_to_half_open(&self, _: State, _: Arc<Rule>) {}
    }
    degrader
        .registry()
        .register_state_change_listeners(vec![
            Arc::new(Counter(Arc::clone(&opened))) as Arc<dyn StateChangeListener>,
        ]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let degrader = degrader.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    if let Ok(entry) = degrader.entry_at("svc", 1) {
                        let outcome = if rng.gen_bool(0.7) {
                            Outcome::failure(1)
                        } else {
                            Outcome::success(1)
                        };
                        entry.exit_at(outcome, 1);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(breaker.current_state(), State::Open);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[test]
fn metric_cache_last_write_wins_per_writer() {
    let degrader = AdaptiveDegrader::new();
    let registry = Arc::clone(degrader.registry());
    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for n in 0..100u64 {
                    registry
                        .set_metric(
                            "svc",
                            ServerMetric::new_at("svc", HealthSignal::new(i, n), n),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    registry
        .set_metric("svc", ServerMetric::new_at("svc", HealthSignal::new(77, 7), 1000))
        .unwrap();
    assert_eq!(registry.get_metric("svc").unwrap().unwrap().load(), 77);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_async_probes() {
    let degrader = AdaptiveDegrader::new();
    open_breaker(&degrader, "svc");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let passed = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let degrader = degrader.clone();
            let passed = Arc::clone(&passed);
            tokio::spawn(async move {
                let result = degrader
                    .call_async("svc", async {
                        passed.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok::<_, ()>(())
                    })
                    .await;
                result.is_ok()
            })
        })
        .collect();
    let mut admitted = 0;
    for t in tasks {
        if t.await.unwrap() {
            admitted += 1;
        }
    }
    // exactly one probe ran, and its success closed the breaker
    assert_eq!(admitted, 1);
    assert_eq!(passed.load(Ordering::SeqCst), 1);
    assert_eq!(
        degrader.registry().breaker_of("svc").unwrap().current_state(),
        State::Closed
    );
}
