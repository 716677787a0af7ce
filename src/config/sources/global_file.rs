//! Global config file source: `$XDG_CONFIG_HOME/bucketsync/config.toml`, optional

use crate::config::xdg;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};

/// Add the global file to the builder when its location can be resolved
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match xdg::global_config_path() {
        Ok(path) => Ok(builder.add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )),
        Err(_) => Ok(builder),
    }
}
