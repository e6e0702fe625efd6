//! Engine settings, read from `notebook.toml`.
//!
//! ```toml
//! max_steps = 1000000
//! max_call_depth = 100
//! max_eval_depth = 2000
//! package_cdn = "https://esm.sh/"
//! capability_name = "notebook"
//! ```

use crate::interpreter::Limits;
use crate::resolver::DEFAULT_PACKAGE_CDN;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "notebook.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`capability_name` must be a plain identifier, got '{0}'")]
    CapabilityName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Statements, loop iterations and calls one invocation may perform.
    pub max_steps: u64,
    pub max_call_depth: usize,
    pub max_eval_depth: usize,
    pub package_cdn: String,
    /// Name of the parameter that carries the capability object.
    pub capability_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_steps: limits.max_steps,
            max_call_depth: limits.max_call_depth,
            max_eval_depth: limits.max_eval_depth,
            package_cdn: DEFAULT_PACKAGE_CDN.to_string(),
            capability_name: "notebook".to_string(),
        }
    }
}

/// Where a configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Default,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reads `notebook.toml` from `directory`, falling back to defaults when
    /// there is none.
    pub fn discover(directory: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        let path = directory.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok((Self::default(), ConfigSource::Default));
        }
        Ok((Self::load(&path)?, ConfigSource::File(path)))
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_steps: self.max_steps,
            max_call_depth: self.max_call_depth,
            max_eval_depth: self.max_eval_depth,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut characters = self.capability_name.chars();
        let valid = characters
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == '$')
            && characters.all(|character| {
                character.is_ascii_alphanumeric() || character == '_' || character == '$'
            });
        if !valid {
            return Err(ConfigError::CapabilityName(self.capability_name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = EngineConfig::from_toml_str("max_steps = 10").expect("valid config");
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.max_call_depth, Limits::default().max_call_depth);
        assert_eq!(config.max_eval_depth, Limits::default().max_eval_depth);
        assert_eq!(config.package_cdn, DEFAULT_PACKAGE_CDN);
        assert_eq!(config.capability_name, "notebook");
    }

    #[test]
    fn test_limits_follow_config() {
        let config = EngineConfig::from_toml_str("max_call_depth = 7\nmax_eval_depth = 90").expect("valid config");
        let limits = config.limits();
        assert_eq!(limits.max_call_depth, 7);
        assert_eq!(limits.max_eval_depth, 90);
        assert_eq!(limits.max_steps, Limits::default().max_steps);
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_names() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_stepz = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("capability_name = \"not valid\""),
            Err(ConfigError::CapabilityName(_))
        ));
    }

    #[test]
    fn test_discover_without_file() {
        let directory = std::env::temp_dir().join(format!("notebook-config-{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&directory).expect("temp dir");
        let (config, source) = EngineConfig::discover(&directory).expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(source, ConfigSource::Default);

        std::fs::write(directory.join(CONFIG_FILE_NAME), "package_cdn = \"https://esm.sh/\"")
            .expect("write config");
        let (config, source) = EngineConfig::discover(&directory).expect("file config");
        assert_eq!(config.package_cdn, "https://esm.sh/");
        assert!(matches!(source, ConfigSource::File(_)));
        let _ = std::fs::remove_dir_all(&directory);
    }
}
