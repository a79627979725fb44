//! Single-flight probing for recovering breakers.
//!
//! Each breaker owns at most one live [`ProbeToken`]. Acquisition is a compare-and-set on the
//! breaker's [`Probe`] slot, so concurrent callers race on a single atomic and exactly one wins.
//! Tokens release themselves on drop; `release_probe` and `clear_all` force the release
//! from outside.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const FREE: u64 = 0;

static NEXT_BREAKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a circuit breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakerId(u64);

impl BreakerId {
    pub fn next() -> Self {
        BreakerId(NEXT_BREAKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// The probe slot of one breaker. `holder` is the generation of the live token, or `FREE`.
#[derive(Debug, Default)]
pub struct Probe {
    holder: AtomicU64,
}

impl Probe {
    pub fn is_in_flight(&self) -> bool {
        self.holder.load(Ordering::SeqCst) != FREE
    }

    fn try_hold(&self, generation: u64) -> bool {
        self.holder
            .compare_exchange(FREE, generation, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Frees the slot only if `generation` still holds it.
    fn release_if_held_by(&self, generation: u64) -> bool {
        self.holder
            .compare_exchange(generation, FREE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn force_release(&self) {
        self.holder.store(FREE, Ordering::SeqCst);
    }
}

/// Proof that the owner is the designated prober of a breaker.
/// The slot is freed exactly once: by `release()` or, failing that, on drop.
#[derive(Debug)]
#[must_use = "dropping the token releases the probe immediately"]
pub struct ProbeToken {
    breaker: BreakerId,
    generation: u64,
    probe: Arc<Probe>,
    released: bool,
}

impl ProbeToken {
    pub fn breaker(&self) -> BreakerId {
        self.breaker
    }

    /// Returns false if the slot was already force-released by the coordinator.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.probe.release_if_held_by(self.generation)
    }
}

impl Drop for ProbeToken {
    fn drop(&mut self) {
        if !self.released {
            self.probe.release_if_held_by(self.generation);
        }
    }
}

/// Hands out probe tokens, one live token per breaker at a time.
#[derive(Debug)]
pub struct ProbeCoordinator {
    probes: DashMap<BreakerId, Arc<Probe>>,
    next_generation: AtomicU64,
}

impl Default for ProbeCoordinator {
    fn default() -> Self {
        ProbeCoordinator {
            probes: DashMap::new(),
            next_generation: AtomicU64::new(FREE + 1),
        }
    }
}

impl ProbeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the probe slot of the breaker, creating it on first use.
    /// The same instance is returned until it is removed.
    pub fn get_probe(&self, breaker: BreakerId) -> Arc<Probe> {
        Arc::clone(self.probes.entry(breaker).or_default().value())
    }

    /// `None` if another token is live for this breaker.
    pub fn acquire_probe(&self, breaker: BreakerId) -> Option<ProbeToken> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        // the slot is held while its shard is locked, so `remove_probe` and `clear_all`
        // never forget a slot in the middle of an acquisition
        let slot = self.probes.entry(breaker).or_default();
        if slot.value().try_hold(generation) {
            Some(ProbeToken {
                breaker,
                generation,
                probe: Arc::clone(slot.value()),
                released: false,
            })
        } else {
            None
        }
    }

    /// Frees the probe of the breaker, whoever holds it. Unknown breakers are ignored.
    pub fn release_probe(&self, breaker: BreakerId) {
        if let Some(probe) = self.probes.get(&breaker) {
            probe.force_release();
        }
    }

    pub fn is_probing(&self, breaker: BreakerId) -> bool {
        self.probes
            .get(&breaker)
            .map(|probe| probe.is_in_flight())
            .unwrap_or(false)
    }

    /// Forgets the probe slot of the breaker, e.g. when the breaker is discarded.
    pub fn remove_probe(&self, breaker: BreakerId) -> Option<Arc<Probe>> {
        self.probes.remove(&breaker).map(|(_, probe)| {
            probe.force_release();
            probe
        })
    }

    /// Releases every outstanding token and forgets all slots.
    ///
    /// Each slot is released and removed under its shard lock, which acquisitions take as well,
    /// so every token handed out afterwards lives in a fresh slot. Meant for shutdown and tests:
    /// a token still held by a running call no longer guards its breaker.
    pub fn clear_all(&self) {
        self.probes.retain(|_, probe| {
            probe.force_release();
            false
        });
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }
}
