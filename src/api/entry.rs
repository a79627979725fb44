use crate::adapter::{self, HeaderCarrier};
use crate::core::adaptive::{
    AdaptiveResult, CircuitBreaker, MetricCodec, Outcome, ProbeToken, Rule, RuleRegistry,
    ServerMetric,
};
use crate::{logging, utils};
use std::sync::Arc;

/// A call admitted by the adaptive circuit breaker.
///
/// Report the result with `exit`. If the entry is dropped without `exit`, e.g. because the
/// call was cancelled or timed out, a held probe counts as failed. The probe is
/// released in either case.
#[derive(Debug)]
#[must_use = "an entry should be finished with `exit`"]
pub struct AdaptiveEntry {
    resource: String,
    rule: Arc<Rule>,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<RuleRegistry>,
    codec: MetricCodec,
    probe: Option<ProbeToken>,
    metric: Option<Arc<ServerMetric>>,
    start_ms: u64,
    finished: bool,
}

impl AdaptiveEntry {
    pub(crate) fn new(
        resource: String,
        rule: Arc<Rule>,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<RuleRegistry>,
        codec: MetricCodec,
        probe: Option<ProbeToken>,
        start_ms: u64,
    ) -> Self {
        AdaptiveEntry {
            resource,
            rule,
            breaker,
            registry,
            codec,
            probe,
            metric: None,
            start_ms,
            finished: false,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The rule in effect when the entry was admitted.
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Whether this call is the single probe of a recovering breaker.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// Marks the outgoing request so the callee reports its health. No-op for disabled rules.
    pub fn attach_marker<C: HeaderCarrier + ?Sized>(&self, request: &mut C) -> bool {
        adapter::attach_marker(&self.rule, request)
    }

    /// Consumes the health header of the response, caching the decoded metric.
    pub fn on_response<C: HeaderCarrier + ?Sized>(
        &mut self,
        response: &mut C,
    ) -> AdaptiveResult<Option<Arc<ServerMetric>>> {
        let metric = adapter::process_response(&self.registry, &self.codec, &self.resource, response)?;
        if metric.is_some() {
            self.metric = metric.clone();
        }
        Ok(metric)
    }

    /// For transports that carry the health signal some other way.
    pub fn set_server_metric(&mut self, metric: ServerMetric) -> AdaptiveResult<Arc<ServerMetric>> {
        let metric = self.registry.set_metric(&self.resource, metric)?;
        self.metric = Some(Arc::clone(&metric));
        Ok(metric)
    }

    /// `exit` reports the outcome of the call and releases the probe, if held.
    pub fn exit(self, outcome: Outcome) {
        self.exit_at(outcome, utils::curr_time_millis())
    }

    pub fn exit_at(mut self, outcome: Outcome, now_ms: u64) {
        // a probe is judged only by what its own response reported, other calls without a
        // metric of their own by the latest cached one
        let metric = match self.metric.take() {
            Some(metric) => Some(metric),
            None if self.probe.is_some() => None,
            None => self.registry.get_metric(&self.resource).unwrap_or(None),
        };
        self.breaker.on_request_complete(
            &self.rule,
            &outcome,
            metric.as_deref(),
            self.probe.is_some(),
            now_ms,
        );
        self.finished = true;
    }

    /// Elapsed time since admission.
    pub fn rt_ms(&self) -> u64 {
        utils::curr_time_millis().saturating_sub(self.start_ms)
    }
}

impl Drop for AdaptiveEntry {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.probe.is_some() {
            logging::debug!(
                "[AdaptiveEntry] Probe abandoned before completion, resource {}",
                self.resource
            );
            self.breaker
                .on_probe_abandoned(&self.rule, utils::curr_time_millis());
        }
    }
}
