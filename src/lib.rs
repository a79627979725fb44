#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![doc(html_logo_url = "https://avatars.githubusercontent.com/u/43955412")]

//! # Adaptive Degradation for Sentinel
//!
//! Classic circuit breakers only see what the caller observes: errors and latencies.
//! Adaptive degradation lets the callee tell the caller how healthy it is. The caller marks
//! requests of protected resources, the callee answers with a compact health token in a
//! response header, and the caller's circuit breaker trips on whichever comes first: a
//! callee reporting overload, or locally observed errors and slow calls.
//!
//! A tripped breaker fails fast until its retry timeout elapses. Then exactly one call
//! is let through as a probe. A healthy probe closes the breaker, anything else reopens it.
//!
//! ## Add Dependency
//!
//! ```toml
//! [dependencies]
//! sentinel-adaptive = { version = "0.1.0" }
//! ```
//!
//! Optional features lists:
//! - logger_env: Use `env_logger` to initialize logging.
//! - logger_log4rs: Use `log4rs` to initialize logging.
//! - http: `HeaderCarrier` implementation for `http::HeaderMap`.
//!
//! ## Initialization
//!
//! - `init_default()`: Load configurations from environment variable. For undefined configurations, use default values.
//! - `init_with_config_file(config_path: &str)`: Load configurations from a YAML file.
//! - `init_with_config(config_entity: ConfigEntity)`: Use hand-crafted `ConfigEntity` to initialize.
//!
//! ## Caller Side
//!
//! ```rust
//! use sentinel_adaptive::{init_default, logging, Outcome};
//! use std::collections::HashMap;
//!
//! let degrader = init_default().unwrap();
//! degrader.set_enabled("GET:/svc/x", true).unwrap();
//! match degrader.entry("GET:/svc/x") {
//!     Ok(mut entry) => {
//!         let mut request = HashMap::new();
//!         entry.attach_marker(&mut request);
//!         // issue the call, then hand the response headers over
//!         let mut response = HashMap::from([("X-Server-Metrics".to_owned(), "L=80;T=12".to_owned())]);
//!         entry.on_response(&mut response).unwrap();
//!         entry.exit(Outcome::success(12));
//!     }
//!     Err(err) => logging::warn!("take the fallback path, {}", err),
//! }
//! ```
//!
//! ## Callee Side
//!
//! ```rust
//! use sentinel_adaptive::{adapter, MetricCodec, SystemMetricCollector};
//! let collector = SystemMetricCollector::new();
//! # let request = std::collections::HashMap::<String, String>::new();
//! # let mut response = std::collections::HashMap::<String, String>::new();
//! adapter::inject_server_metric(&request, &mut response, &collector, &MetricCodec::default());
//! ```
//!
//! ## Dynamic Rules
//!
//! Rules can be pushed as JSON or YAML through a `datasource::DefaultPropertyHandler`
//! into a `RuleProperty` the registry is registered to with `RuleRegistry::register_to_property`.
//! A pushed rule set replaces the previous one atomically.

/// Transport-agnostic header contract and integration helpers.
pub mod adapter;
/// Entry points: initialization and the `AdaptiveDegrader` handle.
pub mod api;
/// Core implementations: codec, rules, the rule registry, circuit breakers, single-flight probes
/// and configuration.
pub mod core;
/// Rule converters and dynamic properties.
pub mod datasource;
/// Adapters for different logging crates.
pub mod logging;
// Utility functions.
pub mod utils;

// re-export precludes
pub use crate::core::adaptive::*;
pub use crate::core::*;
pub use api::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
