use super::AdaptiveEntry;
use crate::adapter::Fallback;
use crate::config::ConfigEntity;
use crate::core::adaptive::{
    Admission, AdaptiveResult, BlockError, MetricCodec, Outcome, ProbeCoordinator, Rule,
    RuleRegistry,
};
use crate::{logging, utils};
use std::future::Future;
use std::sync::Arc;

/// `AdaptiveDegrader` owns the state of adaptive degradation for a process: the rule registry
/// (rules, server metrics, breakers), the probe coordinator and the health token codec.
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct AdaptiveDegrader {
    registry: Arc<RuleRegistry>,
    probes: Arc<ProbeCoordinator>,
    codec: MetricCodec,
}

impl Default for AdaptiveDegrader {
    fn default() -> Self {
        Self::with_config(&ConfigEntity::default())
    }
}

impl AdaptiveDegrader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(entity: &ConfigEntity) -> Self {
        let defaults = entity.config.adaptive.clone();
        let codec = MetricCodec::new(defaults.max_token_len);
        Self::with_parts(
            Arc::new(RuleRegistry::with_defaults(defaults)),
            Arc::new(ProbeCoordinator::new()),
            codec,
        )
    }

    pub fn with_parts(
        registry: Arc<RuleRegistry>,
        probes: Arc<ProbeCoordinator>,
        codec: MetricCodec,
    ) -> Self {
        AdaptiveDegrader {
            registry,
            probes,
            codec,
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn probes(&self) -> &Arc<ProbeCoordinator> {
        &self.probes
    }

    pub fn codec(&self) -> &MetricCodec {
        &self.codec
    }

    /// Shortcut of `RuleRegistry::set_enabled`.
    pub fn set_enabled(&self, resource: &str, enabled: bool) -> AdaptiveResult<Arc<Rule>> {
        self.registry.set_enabled(resource, enabled)
    }

    /// `entry` asks the breaker of the resource for admission.
    /// A rejection is returned as `AdaptiveError::Blocked`; it is an expected outcome and
    /// the caller should take its fallback path. No `exit` is needed then.
    pub fn entry(&self, resource: &str) -> AdaptiveResult<AdaptiveEntry> {
        self.entry_at(resource, utils::curr_time_millis())
    }

    pub fn entry_at(&self, resource: &str, now_ms: u64) -> AdaptiveResult<AdaptiveEntry> {
        let rule = self.registry.get_rule(resource)?;
        let breaker = self.registry.breaker_of(resource)?;
        let probe = match breaker.try_pass(&rule, &self.probes, now_ms) {
            Admission::Pass => None,
            Admission::Probe(token) => Some(token),
            Admission::Blocked(reason) => {
                logging::debug!(
                    "[AdaptiveDegrader] Blocked, resource {}, reason {}",
                    resource,
                    reason
                );
                return Err(BlockError::new(resource, reason).into());
            }
        };
        Ok(AdaptiveEntry::new(
            resource.to_owned(),
            rule,
            breaker,
            Arc::clone(&self.registry),
            self.codec,
            probe,
            now_ms,
        ))
    }

    /// Runs `f` guarded by the breaker of the resource. The outer `Err` is a rejection
    /// or an invalid resource; the inner result is the one of `f`.
    pub fn call<T, E, F>(&self, resource: &str, f: F) -> AdaptiveResult<Result<T, E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let entry = self.entry(resource)?;
        let result = f();
        let rt_ms = entry.rt_ms();
        entry.exit(Outcome::from_result(&result, rt_ms));
        Ok(result)
    }

    /// Like `call`, but a rejection is turned into a value by `fallback`.
    pub fn call_or_fallback<T, E, F, B>(
        &self,
        resource: &str,
        f: F,
        fallback: &B,
    ) -> AdaptiveResult<Result<T, E>>
    where
        F: FnOnce() -> Result<T, E>,
        B: Fallback<T> + ?Sized,
    {
        match self.call(resource, f) {
            Err(crate::core::adaptive::AdaptiveError::Blocked(blocked)) => {
                fallback.handle(&blocked).map(Ok)
            }
            other => other,
        }
    }

    /// Async version of `call`. If the returned future is dropped before completion,
    /// the call is treated as abandoned.
    pub async fn call_async<T, E, Fut>(&self, resource: &str, fut: Fut) -> AdaptiveResult<Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = self.entry(resource)?;
        let result = fut.await;
        let rt_ms = entry.rt_ms();
        entry.exit(Outcome::from_result(&result, rt_ms));
        Ok(result)
    }

    /// Drops all rules, metrics, breakers and outstanding probes. Meant for tests.
    pub fn clear(&self) {
        self.probes.clear_all();
        self.registry.clear();
    }
}
