//! Configuration module for the Sonic gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//!
//! # Example
//! ```rust,no_run
//! use sonic_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod merge;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::sonic::{AwsCredentials, SonicConfig};
use crate::core::tools::ToolSettings;

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Server settings (host, port, CORS, session limit)
/// - AWS region and optional static credentials
/// - Default per-session Sonic settings
/// - Tool selection and endpoints
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // AWS settings
    /// AWS region for Bedrock (default: us-east-1)
    pub aws_region: String,
    /// Static credentials; when absent the default AWS provider chain is used
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,

    /// Defaults for every session
    pub sonic: SonicConfig,

    /// Tool selection and endpoints
    pub tools: ToolSettings,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    /// Maximum concurrent sessions
    /// Default: None (unlimited)
    pub max_sessions: Option<usize>,
}

/// Zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.aws_access_key_id {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.aws_secret_access_key {
            secret.zeroize();
        }
        if let Some(ref mut token) = self.aws_session_token {
            token.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and defaults).
    ///
    /// The .env file is loaded in main.rs before this is called, so its
    /// values are visible here as environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.port == 0 {
            return Err("PORT must be greater than zero".into());
        }
        if self.tools.timeout_ms == 0 {
            return Err("Tool timeout must be greater than zero".into());
        }
        if self.max_sessions == Some(0) {
            return Err("MAX_SESSIONS must be greater than zero".into());
        }
        if self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some() {
            return Err(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".into(),
            );
        }
        self.sonic.validate()?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Static AWS credentials, if both key parts are configured.
    pub fn aws_credentials(&self) -> Option<AwsCredentials> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(AwsCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: self.aws_session_token.clone(),
            }),
            _ => None,
        }
    }
}
