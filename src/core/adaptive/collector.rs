//! Callee-side producer of the health signal.

use super::HealthSignal;
use crate::{logging, utils};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use sysinfo::{get_current_pid, ProcessExt, System, SystemExt};

/// Supplies the health signal a callee reports in its responses.
pub trait ServerMetricProvider: Send + Sync {
    fn current_signal(&self) -> HealthSignal;
}

impl<F> ServerMetricProvider for F
where
    F: Fn() -> HealthSignal + Send + Sync,
{
    fn current_signal(&self) -> HealthSignal {
        self()
    }
}

// weight of the newest sample in the latency moving average, in percent
const LATENCY_EWMA_WEIGHT: u64 = 20;

/// Collects the health of the current process:
/// - load: one minute load average as a percentage of the available cores, capped at 100
/// - cpu: process CPU usage as a percentage of the available cores, capped at 100
/// - latency: moving average of the handled request latencies
/// - concurrency: requests in flight
///
/// Load and CPU are sampled by `refresh`, either called by hand or by the background
/// refresher started with `start`.
#[derive(Debug)]
pub struct SystemMetricCollector {
    system: Mutex<System>,
    cores: usize,
    load: AtomicU32,
    cpu_usage: AtomicU32,
    latency_ms: AtomicU64,
    in_flight: AtomicU64,
}

impl Default for SystemMetricCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one request in flight; on drop it records the elapsed time as a latency sample.
#[derive(Debug)]
#[must_use = "the request is considered finished when the guard is dropped"]
pub struct InFlight<'a> {
    collector: &'a SystemMetricCollector,
    start_ms: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.collector.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.collector
            .record_latency(utils::curr_time_millis().saturating_sub(self.start_ms));
    }
}

impl SystemMetricCollector {
    pub fn new() -> Self {
        SystemMetricCollector {
            system: Mutex::new(System::new()),
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            load: AtomicU32::new(0),
            cpu_usage: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
        }
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Starts a request; keep the guard until the response is produced.
    pub fn track(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            collector: self,
            start_ms: utils::curr_time_millis(),
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Folds a latency sample into the moving average. The first sample is taken as is.
    pub fn record_latency(&self, rt_ms: u64) {
        let _ = self
            .latency_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |avg| {
                if avg == 0 {
                    Some(rt_ms)
                } else {
                    Some(
                        (avg * (100 - LATENCY_EWMA_WEIGHT) + rt_ms * LATENCY_EWMA_WEIGHT) / 100,
                    )
                }
            });
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms.load(Ordering::SeqCst)
    }

    /// Samples system load and process CPU usage.
    pub fn refresh(&self) {
        let mut system = match self.system.lock() {
            Ok(system) => system,
            Err(poisoned) => poisoned.into_inner(),
        };
        let load_avg = system.load_average().one;
        self.load
            .store(normalize(load_avg * 100.0, self.cores), Ordering::SeqCst);
        match get_current_pid() {
            Ok(pid) => {
                system.refresh_process(pid);
                if let Some(process) = system.process(pid) {
                    self.cpu_usage.store(
                        normalize(process.cpu_usage() as f64, self.cores),
                        Ordering::SeqCst,
                    );
                }
            }
            Err(err) => {
                logging::error!(
                    "[SystemMetricCollector] Failed to retrieve current process, error {}",
                    err
                );
            }
        }
    }

    /// Spawns a thread that refreshes the collector every `interval_ms`.
    /// The thread exits once the collector is dropped.
    pub fn start(self: &Arc<Self>, interval_ms: u64) {
        if interval_ms == 0 {
            return;
        }
        let collector: Weak<Self> = Arc::downgrade(self);
        std::thread::spawn(move || {
            while let Some(collector) = collector.upgrade() {
                collector.refresh();
                drop(collector);
                utils::sleep_for_ms(interval_ms);
            }
        });
    }
}

impl ServerMetricProvider for SystemMetricCollector {
    fn current_signal(&self) -> HealthSignal {
        HealthSignal::new(self.load.load(Ordering::SeqCst), self.latency_ms())
            .with_cpu_usage(self.cpu_usage.load(Ordering::SeqCst))
            .with_concurrency(self.in_flight())
    }
}

/// `percent` summed over all cores, as a percentage of the whole machine
fn normalize(percent: f64, cores: usize) -> u32 {
    if !percent.is_finite() || percent <= 0.0 {
        return 0;
    }
    let per_machine = percent / cores.max(1) as f64;
    per_machine.round().min(100.0) as u32
}
