//! The header contract between caller and callee.
//!
//! 1. The caller marks a request with `X-Sentinel-Adaptive: enabled` when adaptive
//!    degradation is enabled for the resource.
//! 2. A callee that sees exactly that marker adds `X-Server-Metrics: <token>` to its response.
//! 3. The caller decodes the token into the registry and strips the header before the
//!    response reaches the application.

use crate::core::adaptive::{
    AdaptiveResult, MetricCodec, Rule, RuleRegistry, ServerMetric, ServerMetricProvider,
};
use crate::logging;
use std::collections::HashMap;
use std::sync::Arc;

/// Request marker asking the callee to report its health.
pub const ADAPTIVE_HEADER: &str = "X-Sentinel-Adaptive";
/// The only value of [`ADAPTIVE_HEADER`] that enables reporting.
pub const ADAPTIVE_ENABLED_VALUE: &str = "enabled";
/// Response header carrying the encoded health token.
pub const SERVER_METRICS_HEADER: &str = "X-Server-Metrics";

/// Minimal view of a header collection. Names are matched case-insensitively.
pub trait HeaderCarrier {
    fn get_header(&self, name: &str) -> Option<&str>;
    /// Replaces every value of `name`.
    fn set_header(&mut self, name: &str, value: String);
    fn remove_header(&mut self, name: &str) -> Option<String>;
}

fn find_key<'a, V>(headers: &'a HashMap<String, V>, name: &str) -> Option<&'a String> {
    headers.keys().find(|k| k.eq_ignore_ascii_case(name))
}

impl HeaderCarrier for HashMap<String, String> {
    fn get_header(&self, name: &str) -> Option<&str> {
        find_key(self, name).and_then(|k| self.get(k)).map(String::as_str)
    }

    fn set_header(&mut self, name: &str, value: String) {
        while self.remove_header(name).is_some() {}
        self.insert(name.to_owned(), value);
    }

    fn remove_header(&mut self, name: &str) -> Option<String> {
        let key = find_key(self, name)?.clone();
        self.remove(&key)
    }
}

#[cfg(feature = "http")]
impl HeaderCarrier for http::HeaderMap {
    fn get_header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    fn set_header(&mut self, name: &str, value: String) {
        let name = match http::header::HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(err) => {
                logging::warn!("[HeaderCarrier] Invalid header name {}, error {:?}", name, err);
                return;
            }
        };
        match http::HeaderValue::from_str(&value) {
            Ok(value) => {
                self.insert(name, value);
            }
            Err(err) => logging::warn!(
                "[HeaderCarrier] Invalid header value {}, error {:?}",
                value,
                err
            ),
        }
    }

    fn remove_header(&mut self, name: &str) -> Option<String> {
        self.remove(name)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
    }
}

/// Caller side: marks the request if the rule is enabled. Returns whether the marker was set.
pub fn attach_marker<C: HeaderCarrier + ?Sized>(rule: &Rule, request: &mut C) -> bool {
    if !rule.enabled {
        return false;
    }
    request.set_header(ADAPTIVE_HEADER, ADAPTIVE_ENABLED_VALUE.to_owned());
    true
}

/// Callee side: whether the request asks for the health signal.
pub fn should_report<C: HeaderCarrier + ?Sized>(request: &C) -> bool {
    request.get_header(ADAPTIVE_HEADER) == Some(ADAPTIVE_ENABLED_VALUE)
}

/// Callee side: adds the current health token to the response if the request asked for it
/// and the response does not carry one yet. Returns whether the header was added.
pub fn inject_server_metric<Req, Resp, P>(
    request: &Req,
    response: &mut Resp,
    provider: &P,
    codec: &MetricCodec,
) -> bool
where
    Req: HeaderCarrier + ?Sized,
    Resp: HeaderCarrier + ?Sized,
    P: ServerMetricProvider + ?Sized,
{
    if !should_report(request) || response.get_header(SERVER_METRICS_HEADER).is_some() {
        return false;
    }
    response.set_header(SERVER_METRICS_HEADER, codec.encode(&provider.current_signal()));
    true
}

/// Caller side: takes the health token out of the response and caches it for `resource`.
///
/// The header is stripped whether or not it decodes. An undecodable token means
/// "no fresh metric" and yields `Ok(None)`.
pub fn process_response<C: HeaderCarrier + ?Sized>(
    registry: &RuleRegistry,
    codec: &MetricCodec,
    resource: &str,
    response: &mut C,
) -> AdaptiveResult<Option<Arc<ServerMetric>>> {
    response.remove_header(ADAPTIVE_HEADER);
    let token = match response.remove_header(SERVER_METRICS_HEADER) {
        Some(token) => token,
        None => return Ok(None),
    };
    match codec.decode(&token, resource) {
        Ok(metric) => registry.set_metric(resource, metric).map(Some),
        Err(err) => {
            logging::debug!(
                "[AdaptiveHeader] Failed to decode server metrics, resource {}, token {:?}, error {}",
                resource,
                token,
                err
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::adaptive::HealthSignal;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn case_insensitive_names() {
        let mut h = headers(&[("x-server-metrics", "L=1;T=1")]);
        assert_eq!(h.get_header(SERVER_METRICS_HEADER), Some("L=1;T=1"));
        h.set_header("X-SERVER-METRICS", "L=2;T=2".into());
        assert_eq!(h.len(), 1);
        assert_eq!(h.remove_header(SERVER_METRICS_HEADER).as_deref(), Some("L=2;T=2"));
        assert!(h.is_empty());
    }

    #[test]
    fn marker_follows_rule() {
        let mut request: HashMap<String, String> = HashMap::new();
        assert!(!attach_marker(&Rule::new("abc"), &mut request));
        assert!(!should_report(&request));
        assert!(attach_marker(&Rule::new("abc").with_enabled(true), &mut request));
        assert!(should_report(&request));
    }

    #[test]
    fn only_exact_marker_value_reports() {
        assert!(!should_report(&headers(&[(ADAPTIVE_HEADER, "Enabled")])));
        assert!(!should_report(&headers(&[(ADAPTIVE_HEADER, "true")])));
        assert!(should_report(&headers(&[("x-sentinel-adaptive", "enabled")])));
    }

    #[test]
    fn inject_at_most_once() {
        let codec = MetricCodec::default();
        let provider = || HealthSignal::new(80, 12);
        let request = headers(&[(ADAPTIVE_HEADER, ADAPTIVE_ENABLED_VALUE)]);
        let mut response: HashMap<String, String> = HashMap::new();
        assert!(inject_server_metric(&request, &mut response, &provider, &codec));
        assert!(!inject_server_metric(&request, &mut response, &provider, &codec));
        assert_eq!(response.get_header(SERVER_METRICS_HEADER), Some("L=80;T=12"));

        let mut response: HashMap<String, String> = HashMap::new();
        assert!(!inject_server_metric(&headers(&[]), &mut response, &provider, &codec));
        assert!(response.is_empty());
    }

    #[test]
    fn process_strips_header() {
        let registry = RuleRegistry::new();
        let codec = MetricCodec::default();

        let mut response = headers(&[(SERVER_METRICS_HEADER, "L=80;T=12"), ("content-type", "text/plain")]);
        let metric = process_response(&registry, &codec, "GET:/svc/x", &mut response)
            .unwrap()
            .unwrap();
        assert_eq!(metric.load(), 80);
        assert_eq!(response.len(), 1);
        assert_eq!(registry.get_metric("GET:/svc/x").unwrap().unwrap().latency_ms(), 12);

        let mut response = headers(&[(SERVER_METRICS_HEADER, "garbage")]);
        assert!(process_response(&registry, &codec, "GET:/svc/x", &mut response)
            .unwrap()
            .is_none());
        assert!(response.is_empty());
        // the cached metric survives an undecodable token
        assert_eq!(registry.get_metric("GET:/svc/x").unwrap().unwrap().load(), 80);

        let mut response: HashMap<String, String> = HashMap::new();
        assert!(process_response(&registry, &codec, "GET:/svc/x", &mut response)
            .unwrap()
            .is_none());
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_header_map() {
        let mut map = http::HeaderMap::new();
        attach_marker(&Rule::new("abc").with_enabled(true), &mut map);
        assert!(should_report(&map));
        map.set_header(SERVER_METRICS_HEADER, "L=1;T=2".into());
        assert_eq!(map.get_header("x-server-metrics"), Some("L=1;T=2"));
        assert_eq!(map.remove_header(SERVER_METRICS_HEADER).as_deref(), Some("L=1;T=2"));
    }
}
