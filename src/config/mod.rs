//! Configuration module for function releases.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `fnrelease.yaml`
//! - Validation of configuration values and declared endpoints
//! - Computing endpoint hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    ApiConfig, ExecutorConfig, ExecutorsConfig, PlannerConfig, PollerConfig, PollersConfig,
    ReleaseConfig, SourcesConfig, StorageSource, DEFAULT_MASTER_TIMEOUT_SECS,
};
pub use parser::{find_config_file, ConfigParser, ACCESS_TOKEN_VAR, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::EndpointHasher;
