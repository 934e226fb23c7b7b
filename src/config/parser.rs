//! Configuration parser for loading release configuration.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, ReleaseError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::spec::ReleaseConfig;

/// File names searched for by [`find_config_file`].
pub const DEFAULT_CONFIG_FILES: &[&str] = &["fnrelease.yaml", "fnrelease.yml"];

/// Environment variable holding the control-plane access token.
pub const ACCESS_TOKEN_VAR: &str = "FNRELEASE_ACCESS_TOKEN";

/// Configuration parser for loading release configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ReleaseConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ReleaseError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ReleaseError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ReleaseConfig> {
        debug!("Parsing YAML configuration");

        let config: ReleaseConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ReleaseError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Successfully parsed configuration for project: {}", config.project);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognized variables: `FNRELEASE_PROJECT`, `FNRELEASE_APP_ENGINE_LOCATION`,
    /// `FNRELEASE_SOURCE_URL`, `FNRELEASE_SOURCE_DIGEST`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ReleaseConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides looked up through `lookup`.
    fn apply_overrides(config: &mut ReleaseConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(project) = lookup("FNRELEASE_PROJECT") {
            debug!("Overriding project from environment");
            config.project = project;
        }

        if let Some(location) = lookup("FNRELEASE_APP_ENGINE_LOCATION") {
            debug!("Overriding app_engine_location from environment");
            config.app_engine_location = location;
        }

        if let Some(url) = lookup("FNRELEASE_SOURCE_URL") {
            debug!("Overriding sources.v1_source_url from environment");
            config.sources.v1_source_url = Some(url);
        }

        if let Some(digest) = lookup("FNRELEASE_SOURCE_DIGEST") {
            debug!("Overriding sources.digest from environment");
            config.sources.digest = Some(digest);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ReleaseError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the control-plane access token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn access_token() -> Result<String> {
        std::env::var(ACCESS_TOKEN_VAR).map_err(|_| {
            ReleaseError::Config(ConfigError::MissingEnvVar {
                name: String::from(ACCESS_TOKEN_VAR),
            })
        })
    }
}

/// Searches for a configuration file from `start_dir` upwards.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ReleaseError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
