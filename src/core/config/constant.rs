// default app settings
pub const SENTINEL_VERSION: &str = "v1";
pub const DEFAULT_APP_NAME: &str = "unknown_service";
pub const APP_NAME_ENV_KEY: &str = "SENTINEL_APP_NAME";
pub const CONF_FILE_PATH_ENV_KEY: &str = "SENTINEL_CONFIG_FILE_PATH";
pub const CONFIG_FILENAME: &str = "USE_DEFAULT_CONFIGURATION";

// default log settings
pub const DEFAULT_LOG_LEVEL: &str = "warn";
pub const LOG_CONFIG_FILE: &str = "testdata/config/log4rs.yaml";

// default adaptive circuit breaking settings
pub const DEFAULT_RETRY_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_STAT_INTERVAL_MS: u32 = 1000;
pub const DEFAULT_MIN_REQUEST_AMOUNT: u64 = 5;
pub const DEFAULT_ERROR_RATIO_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SERVER_LOAD_THRESHOLD: u32 = 90;
pub const DEFAULT_METRIC_TTL_MS: u64 = 3000;
pub const DEFAULT_MAX_TOKEN_LEN: usize = 256;
