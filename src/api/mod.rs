//! mod `api` provides the topmost fundamental APIs for users using sentinel-adaptive.
//! Users must initialize before loading rules. There are three ways to perform initialization:
//!
//!  1. `init_default()`, using default config (or the file named by `SENTINEL_CONFIG_FILE_PATH`) to initialize.
//!  2. `init_with_config(config_entity: ConfigEntity)`, using customized config Entity to initialize.
//!  3. `init_with_config_file(config_path: &str)`, using yaml file to initialize.
//!
//! Each of them returns an [`AdaptiveDegrader`], the handle to the state of adaptive degradation.
//! Share it (it is cheap to clone) with every component issuing protected calls.

mod degrader;
mod entry;
mod init;

pub use degrader::*;
pub use entry::*;
pub use init::*;
