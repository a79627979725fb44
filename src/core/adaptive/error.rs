use std::fmt;
use thiserror::Error;

/// Failure to decode a health token. Callers treat it as "no fresh metric".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty health token")]
    Empty,
    #[error("health token exceeds {max} bytes (got {len})")]
    TooLong { len: usize, max: usize },
    #[error("malformed pair `{0}` in health token")]
    MalformedPair(String),
    #[error("duplicate key `{0}` in health token")]
    DuplicateKey(String),
    #[error("invalid number for key `{key}`: `{value}`")]
    InvalidNumber { key: String, value: String },
    #[error("missing required key `{0}` in health token")]
    MissingField(&'static str),
}

/// Why an entry was not admitted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The breaker is open and the recovery interval has not elapsed.
    BreakerOpen,
    /// The breaker is recovering and another caller holds the probe.
    ProbeUnavailable,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::BreakerOpen => write!(f, "circuit breaker is open"),
            BlockReason::ProbeUnavailable => write!(f, "probe is held by another caller"),
        }
    }
}

/// A rejection produced by the breaker. It is an expected outcome:
/// the caller is supposed to take its fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("adaptive circuit breaker blocked resource `{resource}`: {reason}")]
pub struct BlockError {
    pub resource: String,
    pub reason: BlockReason,
}

impl BlockError {
    pub fn new(resource: impl Into<String>, reason: BlockReason) -> Self {
        BlockError {
            resource: resource.into(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdaptiveError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A lookup or update referenced an empty resource name.
    #[error("invalid rule reference: resource name must not be empty")]
    InvalidRuleReference,
    #[error("invalid adaptive degrade rule for `{resource}`: {reason}")]
    InvalidRule { resource: String, reason: String },
    #[error(transparent)]
    Blocked(#[from] BlockError),
}

impl AdaptiveError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, AdaptiveError::Blocked(_))
    }
}

pub type AdaptiveResult<T> = std::result::Result<T, AdaptiveError>;
