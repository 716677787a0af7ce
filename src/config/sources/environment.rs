//! Environment variable source: `BUCKETSYNC__` prefix, `__` between nested keys

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

pub const ENV_PREFIX: &str = "BUCKETSYNC";

/// Add the environment overlay, e.g. `BUCKETSYNC__TREE_DEPTH=20` or
/// `BUCKETSYNC__LOGGING__LEVEL=debug`
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    ))
}
