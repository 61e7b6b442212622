//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
source:
  dump_path: ./dump
target:
  host: localhost
  database: app
  user: postgres
  password: secret
migration:
  batch_size: 25
  skip_steps:
    - create-functions
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.ssl_mode, "require");
        assert_eq!(config.migration.batch_size, 25);
        assert!(config.migration.skips_step("create-functions"));
        assert!(!config.migration.skips_step("create-schema"));
        assert!(!config.migration.skip_incomplete_statements);
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = SAMPLE_YAML.replace("host: localhost", "host: \"\"");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::from_yaml(SAMPLE_YAML).unwrap();
        let b = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(a.hash(), b.hash());

        let mut c = Config::from_yaml(SAMPLE_YAML).unwrap();
        c.migration.batch_size = 100;
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_default_report_path() {
        let config = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(
            config.migration.get_report_path(),
            std::path::PathBuf::from("migration-summary.json")
        );
    }
}
