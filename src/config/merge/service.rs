//! MergeService: stacks the sources in precedence order and deserializes a NodeConfig

use super::policy;
use crate::config::sources::{environment, global_file};
use crate::config::NodeConfig;
use config::{ConfigError, File, FileFormat};
use std::path::Path;

pub struct MergeService;

impl MergeService {
    /// Defaults, then the global file, then `explicit` if given, then the environment
    pub fn load(explicit: Option<&Path>) -> Result<NodeConfig, ConfigError> {
        let builder = policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = match explicit {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml)),
            None => builder,
        };
        let builder = environment::add_to_builder(builder)?;

        builder.build()?.try_deserialize()
    }

    /// Defaults only
    pub fn defaults() -> Result<NodeConfig, ConfigError> {
        policy::builder_with_defaults()?.build()?.try_deserialize()
    }
}
