//!  Adaptive Circuit Breaker State Machine:
//!
//!                  local statistics or server signal breach the rule
//!
//!             +-----------------------------------------------------------------------+
//!             |                                                                       |
//!             |                                                                       v
//!     +----------------+                   +----------------+  retry timeout  +----------------+
//!     |                |                   |                |<----------------|                |
//!     |                |   Probe succeed   |                |                 |                |
//!     |     Closed     |<------------------|    HalfOpen    |                 |      Open      |
//!     |                |                   |                |   Probe failed  |                |
//!     |                |                   |                +---------------->|                |
//!     +----------------+                   +----------------+                 +----------------+
//!
//! While half-open, only the holder of the breaker's probe token is let through.

pub mod stat;

pub use stat::*;

use super::{BlockReason, BreakerId, ProbeCoordinator, ProbeToken, Rule, ServerMetric};
use crate::{logging, utils};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// States of Circuit Breaker State Machine
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl Default for State {
    fn default() -> State {
        State::Closed
    }
}

impl State {
    fn to_bits(self) -> u64 {
        match self {
            State::Closed => 0,
            State::HalfOpen => 1,
            State::Open => 2,
        }
    }

    fn from_bits(bits: u64) -> State {
        match bits {
            1 => State::HalfOpen,
            2 => State::Open,
            _ => State::Closed,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What made the breaker open.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TripCause {
    /// The callee reported a load or latency at or above the rule thresholds.
    ServerSignal { load: u32, latency_ms: u64 },
    ErrorRatio(f64),
    SlowRequestRatio(f64),
    /// The half-open probe failed, was too slow, or was abandoned.
    ProbeFailed,
}

/// Outcome of a finished call, as seen by the caller.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub rt_ms: u64,
    pub error: bool,
}

impl Outcome {
    pub fn success(rt_ms: u64) -> Self {
        Outcome { rt_ms, error: false }
    }

    pub fn failure(rt_ms: u64) -> Self {
        Outcome { rt_ms, error: true }
    }

    pub fn from_result<T, E>(result: &std::result::Result<T, E>, rt_ms: u64) -> Self {
        Outcome {
            rt_ms,
            error: result.is_err(),
        }
    }
}

/// Gate decision of [`CircuitBreaker::evaluate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Only a caller holding the probe token may go through.
    Probe,
    Reject,
}

/// Result of [`CircuitBreaker::try_pass`].
#[derive(Debug)]
pub enum Admission {
    Pass,
    Probe(ProbeToken),
    Blocked(BlockReason),
}

impl Admission {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Admission::Blocked(_))
    }
}

/// `StateChangeListener` listens on the circuit breaker state change event
pub trait StateChangeListener: Sync + Send {
    /// `on_transform_to_closed` is triggered when circuit breaker state transformed to Closed.
    fn on_transform_to_closed(&self, prev: State, rule: Arc<Rule>);

    /// `on_transform_to_open` is triggered when circuit breaker state transformed to Open.
    /// The `cause` indicates the triggered value when the transformation occurs.
    fn on_transform_to_open(&self, prev: State, rule: Arc<Rule>, cause: TripCause);

    /// `on_transform_to_half_open` is triggered when circuit breaker state transformed to HalfOpen.
    fn on_transform_to_half_open(&self, prev: State, rule: Arc<Rule>);
}

pub type StateChangeListeners = ArcSwap<Vec<Arc<dyn StateChangeListener>>>;

// `status` packs the state into the top two bits and the next retry timestamp (ms)
// into the rest, so a transition and its timer are published by one CAS.
const STATE_SHIFT: u32 = 62;
const TIMESTAMP_MASK: u64 = (1 << STATE_SHIFT) - 1;

#[inline]
fn pack(state: State, next_retry_timestamp_ms: u64) -> u64 {
    (state.to_bits() << STATE_SHIFT) | (next_retry_timestamp_ms & TIMESTAMP_MASK)
}

#[inline]
fn unpack(status: u64) -> (State, u64) {
    (
        State::from_bits(status >> STATE_SHIFT),
        status & TIMESTAMP_MASK,
    )
}

/// Per-resource breaker. It does not own its rule: the current rule is passed in on
/// every call, so rule changes (including toggling `enabled`) apply on the next call.
pub struct CircuitBreaker {
    id: BreakerId,
    resource: String,
    status: AtomicU64,
    stat: WindowStat,
    listeners: Arc<StateChangeListeners>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("state", &self.current_state())
            .field("next_retry_timestamp_ms", &self.next_retry_timestamp_ms())
            .field("stat", &self.stat.snapshot())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(resource: impl Into<String>) -> Self {
        Self::with_listeners(resource, Arc::new(ArcSwap::from_pointee(Vec::new())))
    }

    pub fn with_listeners(resource: impl Into<String>, listeners: Arc<StateChangeListeners>) -> Self {
        CircuitBreaker {
            id: BreakerId::next(),
            resource: resource.into(),
            status: AtomicU64::new(pack(State::Closed, 0)),
            stat: WindowStat::new(),
            listeners,
        }
    }

    pub fn id(&self) -> BreakerId {
        self.id
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// `current_state` returns current state of the circuit breaker.
    pub fn current_state(&self) -> State {
        unpack(self.status.load(Ordering::SeqCst)).0
    }

    /// the time the breaker could probe, `0` unless open or half-open
    pub fn next_retry_timestamp_ms(&self) -> u64 {
        unpack(self.status.load(Ordering::SeqCst)).1
    }

    pub fn stat(&self) -> StatSnapshot {
        self.stat.snapshot()
    }

    pub fn retry_timeout_arrived(&self, now_ms: u64) -> bool {
        now_ms >= self.next_retry_timestamp_ms()
    }

    /// Gate check without taking a probe. Moves Open to HalfOpen once the retry timeout has
    /// arrived. A disabled rule bypasses the breaker.
    pub fn evaluate(&self, rule: &Arc<Rule>, now_ms: u64) -> Decision {
        if !rule.enabled {
            return Decision::Allow;
        }
        match self.current_state() {
            State::Closed => Decision::Allow,
            State::Open => {
                if self.retry_timeout_arrived(now_ms) {
                    self.from_open_to_half_open(rule);
                    // either we or a concurrent caller moved it to half-open
                    match self.current_state() {
                        State::Closed => Decision::Allow,
                        State::HalfOpen => Decision::Probe,
                        State::Open => Decision::Reject,
                    }
                } else {
                    Decision::Reject
                }
            }
            State::HalfOpen => Decision::Probe,
        }
    }

    /// Records the outcome (and the callee signal, if any) of a call, then returns the
    /// gate decision for the next call.
    pub fn evaluate_outcome(
        &self,
        rule: &Arc<Rule>,
        outcome: Option<&Outcome>,
        metric: Option<&ServerMetric>,
        now_ms: u64,
    ) -> Decision {
        match outcome {
            Some(outcome) => self.on_request_complete(rule, outcome, metric, false, now_ms),
            None => {
                if let Some(metric) = metric {
                    self.on_server_metric(rule, metric, now_ms);
                }
            }
        }
        self.evaluate(rule, now_ms)
    }

    /// `try_pass` acquires permission of an invocation only if it is available at the time of invocation.
    /// In half-open state the caller must win the breaker's probe from `probes`.
    pub fn try_pass(&self, rule: &Arc<Rule>, probes: &ProbeCoordinator, now_ms: u64) -> Admission {
        match self.evaluate(rule, now_ms) {
            Decision::Allow => Admission::Pass,
            Decision::Reject => Admission::Blocked(BlockReason::BreakerOpen),
            Decision::Probe => self.admit_probe(probes),
        }
    }

    /// The probe may have failed and reopened the breaker between the state check and the
    /// acquisition, so a won token only counts while the breaker is still half-open.
    fn admit_probe(&self, probes: &ProbeCoordinator) -> Admission {
        match probes.acquire_probe(self.id) {
            Some(token) if self.current_state() == State::HalfOpen => Admission::Probe(token),
            Some(_) => Admission::Blocked(BlockReason::BreakerOpen),
            None => Admission::Blocked(BlockReason::ProbeUnavailable),
        }
    }

    /// `on_request_complete` records a completed request and handles state transformation.
    /// In half-open state only the outcome of the probe (`is_probe`) decides the next state;
    /// late completions of calls admitted earlier only feed the statistics.
    pub fn on_request_complete(
        &self,
        rule: &Arc<Rule>,
        outcome: &Outcome,
        metric: Option<&ServerMetric>,
        is_probe: bool,
        now_ms: u64,
    ) {
        if !rule.enabled {
            return;
        }
        let snapshot = self.stat.record(
            outcome.error,
            rule.is_slow(outcome.rt_ms),
            rule.stat_interval_ms as u64,
            now_ms,
        );
        let metric = metric.filter(|m| m.is_fresh(rule.metric_ttl_ms, now_ms));

        match self.current_state() {
            State::HalfOpen if is_probe => {
                if probe_succeeded(rule, outcome, metric) {
                    self.from_half_open_to_closed(rule);
                } else {
                    self.from_half_open_to_open(rule, TripCause::ProbeFailed, now_ms);
                }
            }
            State::Closed => {
                if let Some(cause) = trip_cause(rule, &snapshot, metric) {
                    self.from_closed_to_open(rule, cause, now_ms);
                }
            }
            _ => {}
        }
    }

    /// Feeds a callee signal that arrived without a call outcome.
    pub fn on_server_metric(&self, rule: &Arc<Rule>, metric: &ServerMetric, now_ms: u64) {
        if !rule.enabled || !metric.is_fresh(rule.metric_ttl_ms, now_ms) {
            return;
        }
        if self.current_state() == State::Closed
            && rule.is_signal_breached(metric.load(), metric.latency_ms())
        {
            self.from_closed_to_open(
                rule,
                TripCause::ServerSignal {
                    load: metric.load(),
                    latency_ms: metric.latency_ms(),
                },
                now_ms,
            );
        }
    }

    /// The probe was abandoned (cancelled or timed out) before an outcome was known.
    pub fn on_probe_abandoned(&self, rule: &Arc<Rule>, now_ms: u64) {
        self.from_half_open_to_open(rule, TripCause::ProbeFailed, now_ms);
    }

    /// from_closed_to_open updates circuit breaker state machine from closed to open.
    /// Return true only if current thread successfully accomplished the transformation.
    pub fn from_closed_to_open(&self, rule: &Arc<Rule>, cause: TripCause, now_ms: u64) -> bool {
        let next_retry = now_ms + rule.retry_timeout_ms as u64;
        if !self.transform(State::Closed, State::Open, next_retry) {
            return false;
        }
        logging::info!(
            "[AdaptiveCircuitBreaker] Closed -> Open, resource {}, cause {:?}, next retry at {}",
            self.resource,
            cause,
            utils::format_time_millis(next_retry)
        );
        for listener in self.listeners.load().iter() {
            listener.on_transform_to_open(State::Closed, Arc::clone(rule), cause);
        }
        true
    }

    /// from_open_to_half_open updates circuit breaker state machine from open to half-open.
    /// Return true only if current thread successfully accomplished the transformation.
    pub fn from_open_to_half_open(&self, rule: &Arc<Rule>) -> bool {
        let next_retry = self.next_retry_timestamp_ms();
        if !self.transform(State::Open, State::HalfOpen, next_retry) {
            return false;
        }
        logging::info!(
            "[AdaptiveCircuitBreaker] Open -> HalfOpen, resource {}",
            self.resource
        );
        for listener in self.listeners.load().iter() {
            listener.on_transform_to_half_open(State::Open, Arc::clone(rule));
        }
        true
    }

    /// from_half_open_to_open updates circuit breaker state machine from half-open to open,
    /// restarting the recovery timer.
    /// Return true only if current thread successfully accomplished the transformation.
    pub fn from_half_open_to_open(&self, rule: &Arc<Rule>, cause: TripCause, now_ms: u64) -> bool {
        let next_retry = now_ms + rule.retry_timeout_ms as u64;
        if !self.transform(State::HalfOpen, State::Open, next_retry) {
            return false;
        }
        logging::info!(
            "[AdaptiveCircuitBreaker] HalfOpen -> Open, resource {}, cause {:?}, next retry at {}",
            self.resource,
            cause,
            utils::format_time_millis(next_retry)
        );
        for listener in self.listeners.load().iter() {
            listener.on_transform_to_open(State::HalfOpen, Arc::clone(rule), cause);
        }
        true
    }

    /// from_half_open_to_closed updates circuit breaker state machine from half-open to closed,
    /// clearing the failure statistics.
    /// Return true only if current thread successfully accomplished the transformation.
    pub fn from_half_open_to_closed(&self, rule: &Arc<Rule>) -> bool {
        if !self.transform(State::HalfOpen, State::Closed, 0) {
            return false;
        }
        self.stat.reset();
        logging::info!(
            "[AdaptiveCircuitBreaker] HalfOpen -> Closed, resource {}",
            self.resource
        );
        for listener in self.listeners.load().iter() {
            listener.on_transform_to_closed(State::HalfOpen, Arc::clone(rule));
        }
        true
    }

    fn transform(&self, from: State, to: State, next_retry_timestamp_ms: u64) -> bool {
        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if unpack(current).0 != from {
                return false;
            }
            match self.status.compare_exchange(
                current,
                pack(to, next_retry_timestamp_ms),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: State, next_retry_timestamp_ms: u64) {
        self.status
            .store(pack(state, next_retry_timestamp_ms), Ordering::SeqCst);
    }
}

fn probe_succeeded(rule: &Rule, outcome: &Outcome, metric: Option<&ServerMetric>) -> bool {
    !outcome.error
        && !rule.is_slow(outcome.rt_ms)
        && metric.map_or(true, |m| !rule.is_signal_breached(m.load(), m.latency_ms()))
}

/// The callee signal is checked first; without a fresh one only local statistics count.
fn trip_cause(
    rule: &Rule,
    snapshot: &StatSnapshot,
    metric: Option<&ServerMetric>,
) -> Option<TripCause> {
    if let Some(m) = metric {
        if rule.is_signal_breached(m.load(), m.latency_ms()) {
            return Some(TripCause::ServerSignal {
                load: m.load(),
                latency_ms: m.latency_ms(),
            });
        }
    }
    if snapshot.total < rule.min_request_amount {
        return None;
    }
    if snapshot.error > 0 && snapshot.error_ratio() >= rule.error_ratio_threshold {
        return Some(TripCause::ErrorRatio(snapshot.error_ratio()));
    }
    if rule.max_allowed_rt_ms > 0
        && snapshot.slow > 0
        && snapshot.slow_ratio() >= rule.slow_ratio_threshold
    {
        return Some(TripCause::SlowRequestRatio(snapshot.slow_ratio()));
    }
    None
}
