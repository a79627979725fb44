use super::{constant::*, ConfigEntity};
use crate::{logging, utils, Error, Result};
use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

/// Resolves the configuration, priority: system environment > YAML file > default config.
/// A blank `config_path` is looked up from `SENTINEL_CONFIG_FILE_PATH`.
pub fn resolve_config(config_path: &str) -> Result<ConfigEntity> {
    let config_path = if utils::is_blank(config_path) {
        env::var(CONF_FILE_PATH_ENV_KEY).unwrap_or_else(|_| CONFIG_FILENAME.into())
    } else {
        config_path.to_owned()
    };
    let mut entity = if config_path == CONFIG_FILENAME {
        ConfigEntity::new()
    } else {
        load_config_from_yaml_file(&config_path)?
    };
    override_items_from_system_env(&mut entity)?;
    Ok(entity)
}

pub fn load_config_from_yaml_file(path_str: &str) -> Result<ConfigEntity> {
    let path = Path::new(path_str);
    if !path.exists() {
        return Err(Error::msg(
            "Sentinel YAML configuration file does not exist!",
        ));
    }
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let entity: ConfigEntity = serde_yaml::from_str(&content)?;
    entity.check()?;
    logging::info!(
        "[Config] Resolving Sentinel config from file, file {}",
        path_str
    );
    Ok(entity)
}

fn override_items_from_system_env(entity: &mut ConfigEntity) -> Result<()> {
    if let Ok(app_name) = env::var(APP_NAME_ENV_KEY) {
        if !utils::is_blank(&app_name) {
            entity.config.app.app_name = app_name;
        }
    }
    entity.check()
}

pub fn init_log(entity: &ConfigEntity) {
    logging::logger_init(Some(entity.config.log.config_file.clone()));
    logging::info!(
        "[Config] App name resolved, appName {}",
        entity.config.app.app_name
    );
    logging::info!(
        "[Config] Print effective global config, globalConfig {:?}",
        entity
    );
}
