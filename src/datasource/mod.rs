//! Rule sources. A raw payload (JSON or YAML) is converted into rules by a
//! [`PropertyConverter`], published through a [`DynamicProperty`] and delivered to every
//! registered [`PropertyListener`], typically a `RuleRegistry`.

pub mod property;

pub use property::*;

use crate::core::adaptive::SentinelRule;
use crate::{logging, Error, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
