//! Building blocks for transport integrations (HTTP clients and servers, RPC interceptors).
//! Nothing here depends on a concrete transport: requests and responses are seen through
//! [`HeaderCarrier`].

pub mod header;

pub use header::*;

use crate::core::adaptive::{AdaptiveResult, BlockError};

/// Names the resource of an outgoing call.
pub trait ResourceExtractor: Send + Sync {
    fn extract(&self, method: &str, target: &str) -> String;
}

impl<F> ResourceExtractor for F
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    fn extract(&self, method: &str, target: &str) -> String {
        self(method, target)
    }
}

/// `METHOD:target`, optionally prefixed, e.g. `GET:/svc/x` or `order-service:GET:/svc/x`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixedExtractor {
    prefix: String,
}

impl PrefixedExtractor {
    pub fn new(prefix: impl Into<String>) -> Self {
        PrefixedExtractor {
            prefix: prefix.into(),
        }
    }
}

impl ResourceExtractor for PrefixedExtractor {
    fn extract(&self, method: &str, target: &str) -> String {
        // drop the query so that one path maps to one resource
        let path = target.split('?').next().unwrap_or(target);
        format!("{}{}:{}", self.prefix, method.to_ascii_uppercase(), path)
    }
}

/// What a caller gets instead of the real response when the breaker rejects the call.
pub trait Fallback<T>: Send + Sync {
    fn handle(&self, blocked: &BlockError) -> AdaptiveResult<T>;
}

impl<T, F> Fallback<T> for F
where
    F: Fn(&BlockError) -> AdaptiveResult<T> + Send + Sync,
{
    fn handle(&self, blocked: &BlockError) -> AdaptiveResult<T> {
        self(blocked)
    }
}

/// Fails fast with the rejection itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectFallback;

impl<T> Fallback<T> for RejectFallback {
    fn handle(&self, blocked: &BlockError) -> AdaptiveResult<T> {
        Err(blocked.clone().into())
    }
}
