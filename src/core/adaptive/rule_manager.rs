use super::*;
use crate::config::AdaptiveDefaults;
use crate::datasource::{DynamicProperty, PropertyListener};
use crate::{logging, utils, Result};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

pub type RuleMap = HashMap<String, Arc<Rule>>;

/// The dynamic source of full rule sets a registry can subscribe to.
pub type RuleProperty = DynamicProperty<Vec<Arc<Rule>>>;

/// Process-scoped state of adaptive degradation: one rule, one cached server metric and
/// one circuit breaker per resource.
///
/// The rule set is an immutable map behind an atomic pointer. Lookups read one snapshot, single
/// upserts copy and swap it, and `replace_all` swaps in a whole new map, so no lookup
/// ever sees two rule generations at once. Metrics and breakers are kept in sharded maps.
///
/// Every resource ever referenced through `get_rule`, `set_metric` or `breaker_of` stays in
/// these maps until `replace_all` drops it from the rule set or `clear` is called.
pub struct RuleRegistry {
    defaults: AdaptiveDefaults,
    rules: ArcSwap<RuleMap>,
    metrics: DashMap<String, Arc<ServerMetric>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listeners: Arc<StateChangeListeners>,
    property: Mutex<Weak<RuleProperty>>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults(AdaptiveDefaults::default())
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("defaults", &self.defaults)
            .field("rules", &self.rules.load().len())
            .field("metrics", &self.metrics.len())
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

fn check_resource(resource: &str) -> AdaptiveResult<()> {
    if utils::is_blank(resource) {
        Err(AdaptiveError::InvalidRuleReference)
    } else {
        Ok(())
    }
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `defaults` parameterize the rules created lazily by `get_rule`.
    pub fn with_defaults(defaults: AdaptiveDefaults) -> Self {
        RuleRegistry {
            defaults,
            rules: ArcSwap::from_pointee(HashMap::new()),
            metrics: DashMap::new(),
            breakers: DashMap::new(),
            listeners: Arc::new(ArcSwap::from_pointee(Vec::new())),
            property: Mutex::new(Weak::new()),
        }
    }

    pub fn defaults(&self) -> &AdaptiveDefaults {
        &self.defaults
    }

    /// `get_rule` returns the rule of the resource, creating and storing a disabled one if absent.
    pub fn get_rule(&self, resource: &str) -> AdaptiveResult<Arc<Rule>> {
        check_resource(resource)?;
        if let Some(rule) = self.rules.load().get(resource) {
            return Ok(Arc::clone(rule));
        }
        let created = Arc::new(Rule::from_defaults(resource, &self.defaults));
        let prev = self.rules.rcu(|rules| {
            if rules.contains_key(resource) {
                Arc::clone(rules)
            } else {
                let mut next = RuleMap::clone(rules);
                next.insert(resource.to_owned(), Arc::clone(&created));
                Arc::new(next)
            }
        });
        // whoever stored the rule first wins
        Ok(prev.get(resource).cloned().unwrap_or(created))
    }

    /// `set_rule` upserts the rule of a single resource. The rule is bound to `resource`.
    pub fn set_rule(&self, resource: &str, mut rule: Rule) -> AdaptiveResult<()> {
        check_resource(resource)?;
        rule.resource = resource.to_owned();
        rule.is_valid().map_err(|err| AdaptiveError::InvalidRule {
            resource: resource.to_owned(),
            reason: err.to_string(),
        })?;
        let rule = Arc::new(rule);
        self.rules.rcu(|rules| {
            let mut next = RuleMap::clone(rules);
            next.insert(resource.to_owned(), Arc::clone(&rule));
            next
        });
        logging::info!(
            "[AdaptiveRuleManager] Rule updated, resource {}, enabled {}",
            resource,
            rule.enabled
        );
        Ok(())
    }

    /// Turns adaptive degradation on or off for the resource, keeping its other parameters.
    pub fn set_enabled(&self, resource: &str, enabled: bool) -> AdaptiveResult<Arc<Rule>> {
        check_resource(resource)?;
        let mut updated = None;
        self.rules.rcu(|rules| {
            let rule = match rules.get(resource) {
                Some(rule) => Rule::clone(rule).with_enabled(enabled),
                None => Rule::from_defaults(resource, &self.defaults).with_enabled(enabled),
            };
            let rule = Arc::new(rule);
            updated = Some(Arc::clone(&rule));
            let mut next = RuleMap::clone(rules);
            next.insert(resource.to_owned(), rule);
            next
        });
        logging::info!(
            "[AdaptiveRuleManager] Resource {}, status of adaptive function activation: {}",
            resource,
            enabled
        );
        Ok(updated.unwrap_or_else(|| Arc::new(Rule::from_defaults(resource, &self.defaults))))
    }

    /// `replace_all` replaces the whole rule set with the given rules in one atomic swap.
    /// Invalid rules are ignored; for duplicated resources the last rule wins.
    /// Breakers of resources kept in the new set survive the swap, while the breaker and cached
    /// metric of a resource dropped from the set are discarded.
    /// Returned `bool` indicates whether the rule set has been changed.
    pub fn replace_all(&self, rules: Vec<Arc<Rule>>) -> bool {
        let mut rule_map: RuleMap = HashMap::with_capacity(rules.len());
        for rule in rules {
            match rule.is_valid() {
                Ok(_) => {
                    if let Some(prev) = rule_map.insert(rule.resource.clone(), rule) {
                        logging::warn!(
                            "[AdaptiveRuleManager] Duplicated rule for one resource, the latter wins, replaced {:?}",
                            prev
                        );
                    }
                }
                Err(err) => logging::warn!(
                    "[AdaptiveRuleManager] Ignoring invalid adaptive rule {:?}, reason: {:?}",
                    rule,
                    err
                ),
            }
        }

        let start = utils::curr_time_nanos();
        let current = self.rules.load();
        if **current == rule_map {
            logging::info!(
                "[AdaptiveRuleManager] Loaded rules is the same with current rules, so ignore load operation."
            );
            return false;
        }
        drop(current);
        if rule_map.is_empty() {
            logging::info!("[AdaptiveRuleManager] Adaptive rules were cleared")
        } else {
            logging::info!(
                "[AdaptiveRuleManager] Adaptive rules were loaded: {:?}",
                rule_map.values()
            )
        }
        let rule_map = Arc::new(rule_map);
        self.rules.store(Arc::clone(&rule_map));
        // breakers and metrics of resources gone from the rule set go with them
        self.breakers.retain(|resource, _| rule_map.contains_key(resource));
        self.metrics.retain(|resource, _| rule_map.contains_key(resource));
        logging::debug!(
            "[AdaptiveRuleManager replace_all] Time statistic(ns) for updating adaptive rules, time cost {}",
            utils::curr_time_nanos() - start
        );
        true
    }

    /// A consistent view of all rules at one point in time.
    pub fn rules_snapshot(&self) -> Arc<RuleMap> {
        self.rules.load_full()
    }

    /// `get_rules` returns all the rules
    pub fn get_rules(&self) -> Vec<Arc<Rule>> {
        self.rules.load().values().cloned().collect()
    }

    /// `get_metric` returns the latest server metric of the resource, if any has been reported.
    pub fn get_metric(&self, resource: &str) -> AdaptiveResult<Option<Arc<ServerMetric>>> {
        check_resource(resource)?;
        Ok(self.metrics.get(resource).map(|m| Arc::clone(m.value())))
    }

    /// `set_metric` caches the metric of the resource, replacing the previous one.
    pub fn set_metric(&self, resource: &str, metric: ServerMetric) -> AdaptiveResult<Arc<ServerMetric>> {
        check_resource(resource)?;
        let metric = Arc::new(metric);
        self.metrics.insert(resource.to_owned(), Arc::clone(&metric));
        Ok(metric)
    }

    pub fn remove_metric(&self, resource: &str) -> Option<Arc<ServerMetric>> {
        self.metrics.remove(resource).map(|(_, m)| m)
    }

    /// `breaker_of` returns the circuit breaker of the resource, creating it on first use.
    pub fn breaker_of(&self, resource: &str) -> AdaptiveResult<Arc<CircuitBreaker>> {
        check_resource(resource)?;
        if let Some(breaker) = self.breakers.get(resource) {
            return Ok(Arc::clone(breaker.value()));
        }
        let breaker = self
            .breakers
            .entry(resource.to_owned())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_listeners(
                    resource,
                    Arc::clone(&self.listeners),
                ))
            });
        Ok(Arc::clone(breaker.value()))
    }

    pub fn get_breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|b| Arc::clone(b.value())).collect()
    }

    /// register_state_change_listeners registers the state change listeners for all circuit breakers of the registry
    pub fn register_state_change_listeners(&self, listeners: Vec<Arc<dyn StateChangeListener>>) {
        if listeners.is_empty() {
            return;
        }
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.extend(listeners.iter().cloned());
            next
        });
    }

    /// clear_state_change_listeners clears the all StateChangeListener
    pub fn clear_state_change_listeners(&self) {
        self.listeners.store(Arc::new(Vec::new()));
    }

    /// Drops all rules, metrics and breakers. State change listeners are kept.
    pub fn clear(&self) {
        self.rules.store(Arc::new(HashMap::new()));
        self.metrics.clear();
        self.breakers.clear();
    }

    /// `register_to_property` subscribes the registry to `property`, leaving the previous one.
    /// If the property already holds a rule set, it is loaded right away.
    pub fn register_to_property(self: &Arc<Self>, property: &Arc<RuleProperty>) {
        let mut current = match self.property.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        logging::info!(
            "[AdaptiveRuleManager] Registering new property to adaptive degrade rule manager"
        );
        let listener: Arc<dyn PropertyListener<Vec<Arc<Rule>>>> = self.clone();
        if let Some(prev) = current.upgrade() {
            prev.remove_listener(&listener);
        }
        property.add_listener(listener);
        *current = Arc::downgrade(property);
    }
}

impl PropertyListener<Vec<Arc<Rule>>> for RuleRegistry {
    fn config_update(&self, value: &Vec<Arc<Rule>>) -> Result<bool> {
        Ok(self.replace_all(value.clone()))
    }

    fn config_load(&self, value: &Vec<Arc<Rule>>) -> Result<bool> {
        Ok(self.replace_all(value.clone()))
    }
}

/// Single-resource pushes: both the initial load and later updates upsert one rule.
impl PropertyListener<Arc<Rule>> for RuleRegistry {
    fn config_update(&self, value: &Arc<Rule>) -> Result<bool> {
        self.set_rule(&value.resource, Rule::clone(value))?;
        Ok(true)
    }

    fn config_load(&self, value: &Arc<Rule>) -> Result<bool> {
        self.set_rule(&value.resource, Rule::clone(value))?;
        Ok(true)
    }
}
