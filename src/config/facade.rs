//! ConfigLoader facade: load through the merge service, then validate

use super::merge::service::MergeService;
use super::NodeConfig;
use crate::error::ApiError;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the standard sources
    pub fn load() -> Result<NodeConfig, ApiError> {
        Self::finish(MergeService::load(None)?)
    }

    /// Load with `path` layered over the global file; the file must exist
    pub fn load_from_file(path: &Path) -> Result<NodeConfig, ApiError> {
        Self::finish(MergeService::load(Some(path))?)
    }

    /// Built-in defaults, ignoring files and environment
    pub fn default() -> Result<NodeConfig, ApiError> {
        Self::finish(MergeService::defaults()?)
    }

    fn finish(config: NodeConfig) -> Result<NodeConfig, ApiError> {
        config.validate()?;
        Ok(config)
    }
}
