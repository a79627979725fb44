use super::constant::*;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    // app_name represents the name of current running service.
    pub app_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            app_name: DEFAULT_APP_NAME.into(),
        }
    }
}

// LogConfig represent the configuration of logging.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    // config_file is only read by the `logger_log4rs` feature
    pub config_file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            config_file: LOG_CONFIG_FILE.into(),
        }
    }
}

/// Parameters applied to rules that are created lazily on first reference,
/// and limits of the health token codec.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AdaptiveDefaults {
    pub retry_timeout_ms: u32,
    pub stat_interval_ms: u32,
    pub min_request_amount: u64,
    pub error_ratio_threshold: f64,
    pub server_load_threshold: u32,
    /// Metrics older than this are ignored by the breaker.
    pub metric_ttl_ms: u64,
    /// Upper bound for the length of an encoded health token.
    pub max_token_len: usize,
}

impl Default for AdaptiveDefaults {
    fn default() -> Self {
        AdaptiveDefaults {
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            stat_interval_ms: DEFAULT_STAT_INTERVAL_MS,
            min_request_amount: DEFAULT_MIN_REQUEST_AMOUNT,
            error_ratio_threshold: DEFAULT_ERROR_RATIO_THRESHOLD,
            server_load_threshold: DEFAULT_SERVER_LOAD_THRESHOLD,
            metric_ttl_ms: DEFAULT_METRIC_TTL_MS,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub app: AppConfig,
    pub log: LogConfig,
    pub adaptive: AdaptiveDefaults,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConfigEntity {
    pub version: String,
    pub config: AdaptiveConfig,
}

impl Default for ConfigEntity {
    fn default() -> Self {
        ConfigEntity {
            version: SENTINEL_VERSION.into(),
            config: AdaptiveConfig::default(),
        }
    }
}

impl ConfigEntity {
    pub fn new() -> Self {
        ConfigEntity::default()
    }

    pub fn check(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(Error::msg("empty version"));
        }
        if self.config.app.app_name.is_empty() {
            return Err(Error::msg("empty app name"));
        }
        let adaptive = &self.config.adaptive;
        if adaptive.retry_timeout_ms == 0 {
            return Err(Error::msg("invalid retry_timeout_ms"));
        }
        if adaptive.stat_interval_ms == 0 {
            return Err(Error::msg("invalid stat_interval_ms"));
        }
        if !(0.0..=1.0).contains(&adaptive.error_ratio_threshold) {
            return Err(Error::msg(
                "invalid error_ratio_threshold (valid range: [0.0, 1.0])",
            ));
        }
        if adaptive.server_load_threshold > 100 {
            return Err(Error::msg(
                "invalid server_load_threshold (valid range: [0, 100])",
            ));
        }
        if adaptive.max_token_len == 0 {
            return Err(Error::msg("invalid max_token_len"));
        }
        Ok(())
    }
}

impl fmt::Display for ConfigEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(fmtted) => write!(f, "{}", fmtted),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}
