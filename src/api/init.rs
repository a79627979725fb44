use super::AdaptiveDegrader;
use crate::config::{self, ConfigEntity};
use crate::Result;

/// `init_default` initializes with the configuration file named by `SENTINEL_CONFIG_FILE_PATH`,
/// or the default configuration if it is unset.
pub fn init_default() -> Result<AdaptiveDegrader> {
    init_with_config_file("")
}

/// `init_with_config_file` loads the YAML file at `config_path`, then applies the system
/// environment overrides.
pub fn init_with_config_file(config_path: &str) -> Result<AdaptiveDegrader> {
    let entity = config::resolve_config(config_path)?;
    init_core_components(entity)
}

/// `init_with_config` initializes with a hand-crafted configuration.
pub fn init_with_config(entity: ConfigEntity) -> Result<AdaptiveDegrader> {
    entity.check()?;
    init_core_components(entity)
}

fn init_core_components(entity: ConfigEntity) -> Result<AdaptiveDegrader> {
    config::init_log(&entity);
    Ok(AdaptiveDegrader::with_config(&entity))
}
