//! Server health signal and its header token representation.
//!
//! A token is a `;`-separated list of `KEY=VALUE` pairs, e.g. `L=80;T=12;C=35;Q=4`:
//!
//! | key | field         | required |
//! |-----|---------------|----------|
//! | `L` | load percent  | yes      |
//! | `T` | latency in ms | yes      |
//! | `C` | cpu percent   | no       |
//! | `Q` | in-flight     | no       |
//!
//! Unknown keys are skipped on decode so that callees may report more than the caller understands.

use super::DecodeError;
use crate::{config::DEFAULT_MAX_TOKEN_LEN, utils};
use serde::{Deserialize, Serialize};
use std::fmt;

const LOAD_KEY: &str = "L";
const LATENCY_KEY: &str = "T";
const CPU_KEY: &str = "C";
const CONCURRENCY_KEY: &str = "Q";
const PAIR_SEPARATOR: char = ';';
const KV_SEPARATOR: char = '=';

/// The fields a callee reports about itself.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HealthSignal {
    /// load factor in percent, 100 means saturated
    pub load: u32,
    /// recent average latency observed by the callee
    pub latency_ms: u64,
    pub cpu_usage: Option<u32>,
    pub concurrency: Option<u64>,
}

impl HealthSignal {
    pub fn new(load: u32, latency_ms: u64) -> Self {
        HealthSignal {
            load,
            latency_ms,
            ..Default::default()
        }
    }

    pub fn with_cpu_usage(mut self, cpu_usage: u32) -> Self {
        self.cpu_usage = Some(cpu_usage);
        self
    }

    pub fn with_concurrency(mut self, concurrency: u64) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// A decoded health signal bound to the resource it was observed for.
/// Immutable; a newer one replaces it in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetric {
    resource: String,
    signal: HealthSignal,
    observed_at_ms: u64,
}

impl ServerMetric {
    pub fn new(resource: impl Into<String>, signal: HealthSignal) -> Self {
        Self::new_at(resource, signal, utils::curr_time_millis())
    }

    pub fn new_at(resource: impl Into<String>, signal: HealthSignal, observed_at_ms: u64) -> Self {
        ServerMetric {
            resource: resource.into(),
            signal,
            observed_at_ms,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn signal(&self) -> &HealthSignal {
        &self.signal
    }

    pub fn load(&self) -> u32 {
        self.signal.load
    }

    pub fn latency_ms(&self) -> u64 {
        self.signal.latency_ms
    }

    pub fn observed_at_ms(&self) -> u64 {
        self.observed_at_ms
    }

    /// `ttl_ms == 0` means metrics never expire.
    pub fn is_fresh(&self, ttl_ms: u64, now_ms: u64) -> bool {
        ttl_ms == 0 || now_ms.saturating_sub(self.observed_at_ms) <= ttl_ms
    }
}

impl fmt::Display for ServerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]@{}",
            self.resource,
            encode(&self.signal),
            self.observed_at_ms
        )
    }
}

/// Stateless, transport-agnostic codec for the health token.
#[derive(Debug, Copy, Clone)]
pub struct MetricCodec {
    max_token_len: usize,
}

impl Default for MetricCodec {
    fn default() -> Self {
        MetricCodec {
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
        }
    }
}

impl MetricCodec {
    pub fn new(max_token_len: usize) -> Self {
        MetricCodec { max_token_len }
    }

    pub fn max_token_len(&self) -> usize {
        self.max_token_len
    }

    /// Deterministic: optional fields follow the required ones in a fixed order.
    pub fn encode(&self, signal: &HealthSignal) -> String {
        let mut token = format!(
            "{}{}{}{}{}{}{}",
            LOAD_KEY,
            KV_SEPARATOR,
            signal.load,
            PAIR_SEPARATOR,
            LATENCY_KEY,
            KV_SEPARATOR,
            signal.latency_ms
        );
        if let Some(cpu) = signal.cpu_usage {
            token.push_str(&format!("{}{}{}{}", PAIR_SEPARATOR, CPU_KEY, KV_SEPARATOR, cpu));
        }
        if let Some(q) = signal.concurrency {
            token.push_str(&format!(
                "{}{}{}{}",
                PAIR_SEPARATOR, CONCURRENCY_KEY, KV_SEPARATOR, q
            ));
        }
        token
    }

    pub fn decode(&self, token: &str, resource: &str) -> Result<ServerMetric, DecodeError> {
        let signal = self.decode_signal(token)?;
        Ok(ServerMetric::new(resource, signal))
    }

    pub fn decode_signal(&self, token: &str) -> Result<HealthSignal, DecodeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DecodeError::Empty);
        }
        if token.len() > self.max_token_len {
            return Err(DecodeError::TooLong {
                len: token.len(),
                max: self.max_token_len,
            });
        }

        let mut load = None;
        let mut latency = None;
        let mut cpu = None;
        let mut concurrency = None;
        for pair in token.split(PAIR_SEPARATOR) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once(KV_SEPARATOR) {
                Some((k, v)) if !k.trim().is_empty() => (k.trim(), v.trim()),
                _ => return Err(DecodeError::MalformedPair(pair.into())),
            };
            match key {
                LOAD_KEY => set_once(&mut load, key, parse_number(key, value)?)?,
                LATENCY_KEY => set_once(&mut latency, key, parse_number(key, value)?)?,
                CPU_KEY => set_once(&mut cpu, key, parse_number(key, value)?)?,
                CONCURRENCY_KEY => set_once(&mut concurrency, key, parse_number(key, value)?)?,
                _ => {}
            }
        }

        Ok(HealthSignal {
            load: load.ok_or(DecodeError::MissingField(LOAD_KEY))?,
            latency_ms: latency.ok_or(DecodeError::MissingField(LATENCY_KEY))?,
            cpu_usage: cpu,
            concurrency,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DecodeError> {
    // `str::parse` would accept a leading `+`
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidNumber {
            key: key.into(),
            value: value.into(),
        });
    }
    value.parse::<T>().map_err(|_| DecodeError::InvalidNumber {
        key: key.into(),
        value: value.into(),
    })
}

fn set_once<T>(slot: &mut Option<T>, key: &str, value: T) -> Result<(), DecodeError> {
    if slot.is_some() {
        return Err(DecodeError::DuplicateKey(key.into()));
    }
    *slot = Some(value);
    Ok(())
}

/// Encodes with the default codec.
pub fn encode(signal: &HealthSignal) -> String {
    MetricCodec::default().encode(signal)
}

/// Decodes with the default codec.
pub fn decode(token: &str, resource: &str) -> Result<ServerMetric, DecodeError> {
    MetricCodec::default().decode(token, resource)
}
