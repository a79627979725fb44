use sentinel_adaptive::adapter::{self, HeaderCarrier, ADAPTIVE_HEADER, SERVER_METRICS_HEADER};
use sentinel_adaptive::datasource::{rule_json_array_parser, DefaultPropertyHandler, PropertyHandler};
use sentinel_adaptive::{
    AdaptiveDegrader, AdaptiveError, BlockReason, HealthSignal, MetricCodec, Outcome, Rule,
    RuleProperty, ServerMetric, State,
};
use std::collections::HashMap;
use std::sync::Arc;

fn recovering_rule(resource: &str) -> Rule {
    Rule {
        retry_timeout_ms: 5,
        min_request_amount: 1,
        ..Rule::new(resource).with_enabled(true)
    }
}

#[test]
fn adaptive_header_round_trip() {
    let caller = AdaptiveDegrader::new();
    let codec = MetricCodec::default();
    caller.set_enabled("GET:/svc/x", true).unwrap();

    let mut entry = caller.entry("GET:/svc/x").unwrap();
    let mut request: HashMap<String, String> = HashMap::new();
    assert!(entry.attach_marker(&mut request));
    assert_eq!(request.get_header(ADAPTIVE_HEADER), Some("enabled"));

    // callee
    let mut response: HashMap<String, String> = HashMap::new();
    response.insert("content-type".into(), "application/json".into());
    let provider = || HealthSignal::new(80, 12);
    assert!(adapter::inject_server_metric(&request, &mut response, &provider, &codec));
    assert_eq!(response.get_header(SERVER_METRICS_HEADER), Some("L=80;T=12"));

    // back on the caller
    entry.on_response(&mut response).unwrap();
    entry.exit(Outcome::success(12));

    let metric = caller.registry().get_metric("GET:/svc/x").unwrap().unwrap();
    assert_eq!(metric.load(), 80);
    assert_eq!(metric.latency_ms(), 12);
    assert_eq!(metric.resource(), "GET:/svc/x");
    assert!(response.get_header(SERVER_METRICS_HEADER).is_none());
    assert!(response.get_header(ADAPTIVE_HEADER).is_none());
    assert_eq!(response.len(), 1);
}

#[test]
fn disabled_resource_bypass() {
    let degrader = AdaptiveDegrader::new();
    degrader
        .registry()
        .set_rule("R", Rule {
            enabled: false,
            ..recovering_rule("R")
        })
        .unwrap();
    let mut request: HashMap<String, String> = HashMap::new();
    for now in 0..1000 {
        let entry = degrader.entry_at("R", now).unwrap();
        assert!(!entry.attach_marker(&mut request));
        entry.exit_at(Outcome::failure(10_000), now);
    }
    assert!(request.is_empty());
    assert_eq!(
        degrader.registry().breaker_of("R").unwrap().current_state(),
        State::Closed
    );
}

#[test]
fn recovery_cycle() {
    let degrader = AdaptiveDegrader::new();
    degrader
        .registry()
        .set_rule("svc", recovering_rule("svc"))
        .unwrap();
    let t0 = 1_000;
    degrader
        .entry_at("svc", t0)
        .unwrap()
        .exit_at(Outcome::failure(1), t0);
    let breaker = degrader.registry().breaker_of("svc").unwrap();
    assert_eq!(breaker.current_state(), State::Open);
    assert!(degrader.entry_at("svc", t0 + 4).unwrap_err().is_blocked());

    let mut first = degrader.entry_at("svc", t0 + 5).unwrap();
    assert_eq!(breaker.current_state(), State::HalfOpen);
    assert!(first.is_probe());
    // concurrent attempt before the first probe is released
    assert!(degrader.probes().acquire_probe(breaker.id()).is_none());
    match degrader.entry_at("svc", t0 + 5) {
        Err(AdaptiveError::Blocked(blocked)) => {
            assert_eq!(blocked.reason, BlockReason::ProbeUnavailable)
        }
        other => panic!("unexpected result {:?}", other),
    }

    first
        .set_server_metric(ServerMetric::new_at("svc", HealthSignal::new(20, 3), t0 + 6))
        .unwrap();
    first.exit_at(Outcome::success(3), t0 + 6);
    assert_eq!(breaker.current_state(), State::Closed);
    assert_eq!(breaker.stat().total, 0);
    assert!(degrader.probes().acquire_probe(breaker.id()).is_some());
}

#[test]
fn recovers_when_trial_response_carries_no_signal() {
    let degrader = AdaptiveDegrader::new();
    degrader
        .registry()
        .set_rule(
            "svc",
            Rule {
                metric_ttl_ms: 0,
                ..recovering_rule("svc")
            },
        )
        .unwrap();
    let breaker = degrader.registry().breaker_of("svc").unwrap();

    let mut overloaded: HashMap<String, String> = HashMap::new();
    overloaded.insert(SERVER_METRICS_HEADER.into(), "L=95;T=1".into());
    let mut entry = degrader.entry_at("svc", 0).unwrap();
    entry.on_response(&mut overloaded).unwrap();
    entry.exit_at(Outcome::success(1), 0);
    assert_eq!(breaker.current_state(), State::Open);

    let mut trial = degrader.entry_at("svc", 5).unwrap();
    assert!(trial.is_probe());
    let mut silent: HashMap<String, String> = HashMap::new();
    assert!(trial.on_response(&mut silent).unwrap().is_none());
    trial.exit_at(Outcome::success(1), 6);
    assert_eq!(breaker.current_state(), State::Closed);
    // the breached signal stays cached, only the trial's own response decides
    assert_eq!(degrader.registry().get_metric("svc").unwrap().unwrap().load(), 95);
}

#[test]
fn failed_probe_restarts_timer() {
    let degrader = AdaptiveDegrader::new();
    degrader
        .registry()
        .set_rule("svc", recovering_rule("svc"))
        .unwrap();
    degrader
        .entry_at("svc", 0)
        .unwrap()
        .exit_at(Outcome::failure(1), 0);
    let probe = degrader.entry_at("svc", 5).unwrap();
    probe.exit_at(Outcome::failure(1), 7);
    let breaker = degrader.registry().breaker_of("svc").unwrap();
    assert_eq!(breaker.current_state(), State::Open);
    assert_eq!(breaker.next_retry_timestamp_ms(), 12);
    assert!(degrader.entry_at("svc", 11).is_err());
    assert!(degrader.entry_at("svc", 12).unwrap().is_probe());
}

#[test]
fn rules_pushed_from_datasource() {
    let degrader = AdaptiveDegrader::new();
    let property = Arc::new(RuleProperty::new());
    degrader.registry().register_to_property(&property);
    let mut handler = DefaultPropertyHandler::new(rule_json_array_parser::<Rule>, Arc::clone(&property));

    handler
        .handle(Some(
            r#"[{"resource": "GET:/svc/x", "enabled": true}, {"resource": "GET:/svc/y", "enabled": true}]"#,
        ))
        .unwrap();
    assert!(degrader.registry().get_rule("GET:/svc/x").unwrap().enabled);

    handler
        .handle(Some(r#"[{"resource": "GET:/svc/y", "enabled": true}]"#))
        .unwrap();
    // gone from the pushed set means disabled with defaults
    assert!(!degrader.registry().get_rule("GET:/svc/x").unwrap().enabled);
    assert!(degrader.registry().get_rule("GET:/svc/y").unwrap().enabled);
}
