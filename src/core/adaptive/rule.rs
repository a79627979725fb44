use crate::{config::AdaptiveDefaults, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Common behaviour of rules that can be pushed by a dynamic datasource.
pub trait SentinelRule: fmt::Debug + Send + Sync {
    fn resource_name(&self) -> String;
    fn is_valid(&self) -> Result<()>;
}

/// Rule encompasses the fields of an adaptive degradation rule.
/// An absent rule is equivalent to `Rule::new(resource)`: disabled, default parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// resource name
    pub resource: String,
    /// whether callee-reported health signals are requested and the breaker is consulted
    pub enabled: bool,
    /// `retry_timeout_ms` represents the recovery interval (in milliseconds) after the breaker opens.
    /// During the open period, no requests are permitted until the timeout has elapsed.
    /// After that, the breaker transforms to half-open state and lets a single probe through.
    pub retry_timeout_ms: u32,
    /// stat_interval_ms represents the length of the local statistic window.
    pub stat_interval_ms: u32,
    /// min_request_amount represents the minimum number of requests in the active window
    /// that can trigger circuit breaking from local statistics.
    pub min_request_amount: u64,
    /// max error ratio in `[0.0, 1.0]`
    pub error_ratio_threshold: f64,
    /// Any invocation slower than this is recorded as slow. `0` disables slow request tracking.
    /// It also bounds the latency of a successful probe.
    pub max_allowed_rt_ms: u64,
    /// max slow request ratio in `[0.0, 1.0]`, only effective with `max_allowed_rt_ms > 0`
    pub slow_ratio_threshold: f64,
    /// Trip when the callee reports a load (percent) at or above it. `0` disables the check.
    pub server_load_threshold: u32,
    /// Trip when the callee reports a latency at or above it. `0` disables the check.
    pub server_rt_threshold_ms: u64,
    /// Server metrics older than this are ignored. `0` means they never expire.
    pub metric_ttl_ms: u64,
}

impl Default for Rule {
    fn default() -> Self {
        Self::from_defaults(String::new(), &AdaptiveDefaults::default())
    }
}

impl Rule {
    pub fn new(resource: impl Into<String>) -> Self {
        Rule {
            resource: resource.into(),
            ..Default::default()
        }
    }

    pub fn from_defaults(resource: impl Into<String>, defaults: &AdaptiveDefaults) -> Self {
        Rule {
            resource: resource.into(),
            enabled: false,
            retry_timeout_ms: defaults.retry_timeout_ms,
            stat_interval_ms: defaults.stat_interval_ms,
            min_request_amount: defaults.min_request_amount,
            error_ratio_threshold: defaults.error_ratio_threshold,
            max_allowed_rt_ms: 0,
            slow_ratio_threshold: 1.0,
            server_load_threshold: defaults.server_load_threshold,
            server_rt_threshold_ms: 0,
            metric_ttl_ms: defaults.metric_ttl_ms,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the callee-reported signal breaches the configured thresholds.
    pub fn is_signal_breached(&self, load: u32, latency_ms: u64) -> bool {
        (self.server_load_threshold > 0 && load >= self.server_load_threshold)
            || (self.server_rt_threshold_ms > 0 && latency_ms >= self.server_rt_threshold_ms)
    }

    pub fn is_slow(&self, rt_ms: u64) -> bool {
        self.max_allowed_rt_ms > 0 && rt_ms > self.max_allowed_rt_ms
    }
}

impl SentinelRule for Rule {
    fn resource_name(&self) -> String {
        self.resource.clone()
    }

    fn is_valid(&self) -> Result<()> {
        if self.resource.is_empty() {
            return Err(Error::msg("empty resource name"));
        }
        if self.stat_interval_ms == 0 {
            return Err(Error::msg("invalid stat_interval_ms"));
        }
        if self.retry_timeout_ms == 0 {
            return Err(Error::msg("invalid retry_timeout_ms"));
        }
        if !(0.0..=1.0).contains(&self.error_ratio_threshold) {
            return Err(Error::msg(
                "invalid error_ratio_threshold (valid range: [0.0, 1.0])",
            ));
        }
        if !(0.0..=1.0).contains(&self.slow_ratio_threshold) {
            return Err(Error::msg(
                "invalid slow_ratio_threshold (valid range: [0.0, 1.0])",
            ));
        }
        if self.server_load_threshold > 100 {
            return Err(Error::msg(
                "invalid server_load_threshold (valid range: [0, 100])",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(fmtted) => write!(f, "{}", fmtted),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::*;

    #[test]
    fn disabled_by_default() {
        let rule = Rule::new("abc");
        assert!(!rule.is_enabled());
        assert_eq!(rule.retry_timeout_ms, DEFAULT_RETRY_TIMEOUT_MS);
        assert_eq!(rule.metric_ttl_ms, DEFAULT_METRIC_TTL_MS);
        assert!(rule.is_valid().is_ok());
    }

    #[test]
    fn signal_breach() {
        let rule = Rule {
            server_load_threshold: 80,
            server_rt_threshold_ms: 0,
            ..Rule::new("abc")
        };
        assert!(rule.is_signal_breached(80, 0));
        assert!(!rule.is_signal_breached(79, 100_000));

        let rule = Rule {
            server_load_threshold: 0,
            server_rt_threshold_ms: 50,
            ..Rule::new("abc")
        };
        assert!(!rule.is_signal_breached(100, 49));
        assert!(rule.is_signal_breached(0, 50));
    }

    #[test]
    fn slow() {
        let mut rule = Rule::new("abc");
        assert!(!rule.is_slow(u64::MAX));
        rule.max_allowed_rt_ms = 20;
        assert!(!rule.is_slow(20));
        assert!(rule.is_slow(21));
    }

    #[test]
    fn from_json() {
        let rule: Rule =
            serde_json::from_str(r#"{"resource":"GET:/svc/x","enabled":true,"server_load_threshold":75}"#)
                .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.server_load_threshold, 75);
        assert_eq!(rule.stat_interval_ms, DEFAULT_STAT_INTERVAL_MS);
    }

    #[test]
    #[should_panic(expected = "empty resource name")]
    fn illegal1() {
        Rule::default().is_valid().unwrap();
    }

    #[test]
    #[should_panic(expected = "invalid stat_interval_ms")]
    fn illegal2() {
        let rule = Rule {
            stat_interval_ms: 0,
            ..Rule::new("abc")
        };
        rule.is_valid().unwrap();
    }

    #[test]
    #[should_panic(expected = "invalid retry_timeout_ms")]
    fn illegal3() {
        let rule = Rule {
            retry_timeout_ms: 0,
            ..Rule::new("abc")
        };
        rule.is_valid().unwrap();
    }

    #[test]
    #[should_panic(expected = "invalid error_ratio_threshold (valid range: [0.0, 1.0])")]
    fn illegal4() {
        let rule = Rule {
            error_ratio_threshold: -0.1,
            ..Rule::new("abc")
        };
        rule.is_valid().unwrap();
    }

    #[test]
    #[should_panic(expected = "invalid server_load_threshold (valid range: [0, 100])")]
    fn illegal5() {
        let rule = Rule {
            server_load_threshold: 101,
            ..Rule::new("abc")
        };
        rule.is_valid().unwrap();
    }
}
