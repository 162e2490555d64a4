//! User configuration file.

use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Model file used when `--model` is not given.
    pub model: Option<PathBuf>,
    /// Distinct values per data source lookup.
    pub batch_size: Option<usize>,
    /// Capacity of the deserialized object cache.
    pub cache_capacity: Option<usize>,
    /// Print a profile after every query.
    pub profile: bool,
    /// Enable verbose output by default.
    pub verbose: bool,
}

impl Config {
    /// Load config from the default location (~/.config/tabulator/config.toml).
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tabulator").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse(
            r#"
[defaults]
model = "/data/model.yaml"
batch_size = 250
profile = true
"#,
        )
        .unwrap();
        assert_eq!(config.defaults.model, Some(PathBuf::from("/data/model.yaml")));
        assert_eq!(config.defaults.batch_size, Some(250));
        assert_eq!(config.defaults.cache_capacity, None);
        assert!(config.defaults.profile);
        assert!(!config.defaults.verbose);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from_path(Some(PathBuf::from("/nonexistent/tabulator.toml")));
        assert!(config.defaults.model.is_none());
    }
}
