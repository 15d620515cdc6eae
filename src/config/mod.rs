//! Configuration parsing and types.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

use std::path::Path;

use tracing::warn;

pub use parser::load_config;
pub use types::*;
pub use validate::validate_config;

use crate::common::error::ConfigError;

/// Load a config file, apply environment overrides and validate the result.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    for var in env::check_empty_env_vars() {
        warn!("{} is set but empty", var);
    }

    let config = env::apply_env_overrides(load_config(path)?);
    validate_config(&config)?;
    Ok(config)
}
