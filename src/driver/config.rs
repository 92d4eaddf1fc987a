use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::RenderConfig;

/// A driver config file. Namely Uranium.toml
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub unit: UnitConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

/// Meta information about the generated compilation unit.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UnitConfig {
    /// The name of the module.
    pub name: Option<String>,
    /// The source file the module claims to come from.
    pub source_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("loaded config from {:?}: {:?}", path, config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.render, RenderConfig::default());
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            [unit]
            name = "uranium_module"
            source_name = "main.ura"

            [render]
            header = false
            indent = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.unit.name.as_deref(), Some("uranium_module"));
        assert_eq!(config.unit.source_name.as_deref(), Some("main.ura"));
        assert!(!config.render.header);
        assert_eq!(config.render.indent, 4);
    }

    #[test]
    fn unknown_file_is_an_error() {
        let error = Config::from_path(Path::new("/nonexistent/Uranium.toml")).unwrap_err();
        assert!(matches!(error, ConfigError::Io { .. }), "{:#?}", error);
    }
}
