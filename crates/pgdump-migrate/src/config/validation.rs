//! Configuration validation.

use crate::config::types::{Config, SKIPPABLE_STEPS};
use crate::error::{MigrateError, Result};

/// Validate a configuration, returning an error describing the first
/// problem found.
pub(crate) fn validate(config: &Config) -> Result<()> {
    if config.source.dump_path.as_os_str().is_empty() {
        return Err(MigrateError::Config(
            "source.dump_path is required".to_string(),
        ));
    }

    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".to_string()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config(
            "target.database is required".to_string(),
        ));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".to_string()));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".to_string(),
        ));
    }

    for step in &config.migration.skip_steps {
        if !SKIPPABLE_STEPS.contains(&step.as_str()) {
            return Err(MigrateError::Config(format!(
                "migration.skip_steps contains unknown step '{}'. Skippable steps: {}",
                step,
                SKIPPABLE_STEPS.join(", ")
            )));
        }
    }

    Ok(())
}
