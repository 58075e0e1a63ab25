use serde::Deserialize;
use std::path::PathBuf;

use crate::core::sonic::{ReconnectionConfig, SonicVoice};
use crate::core::tools::ToolSet;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8081
///   cors_allowed_origins: "https://app.example.com"
///   max_sessions: 50
///
/// aws:
///   region: "us-east-1"
///   access_key_id: "AKIA..."
///   secret_access_key: "..."
///
/// sonic:
///   model_id: "amazon.nova-sonic-v1:0"
///   voice: "tiffany"
///   show_speculative: false
///   max_tokens: 1024
///   reconnection:
///     max_attempts: 5
///
/// tools:
///   set: "companion"
///   weather_base_url: "https://wttr.in"
///   time_base_url: "https://timeapi.io"
///   timeout_ms: 5000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub aws: Option<AwsYaml>,
    pub sonic: Option<SonicYaml>,
    pub tools: Option<ToolsYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_allowed_origins: Option<String>,
    pub max_sessions: Option<usize>,
}

/// AWS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AwsYaml {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SonicYaml {
    pub model_id: Option<String>,
    pub voice: Option<SonicVoice>,
    pub system_prompt: Option<String>,
    pub show_speculative: Option<bool>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
    pub dedup_cooldown_ms: Option<u64>,
    pub audio_buffer_threshold: Option<usize>,
    pub max_consecutive_decode_failures: Option<u32>,
    pub reconnection: Option<ReconnectionConfig>,
}

/// Tool configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub set: Option<ToolSet>,
    pub weather_base_url: Option<String>,
    pub time_base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  cors_allowed_origins: "*"
  max_sessions: 10

aws:
  region: "eu-west-1"
  access_key_id: "key-id"
  secret_access_key: "secret"

sonic:
  voice: "amy"
  show_speculative: true
  top_p: 0.5
  reconnection:
    max_attempts: 5
    jitter: false

tools:
  set: "all"
  timeout_ms: 2500
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(8080));
        assert_eq!(server.max_sessions, Some(10));

        let aws = config.aws.unwrap();
        assert_eq!(aws.region.as_deref(), Some("eu-west-1"));
        assert!(aws.session_token.is_none());

        let sonic = config.sonic.unwrap();
        assert_eq!(sonic.voice, Some(SonicVoice::Amy));
        assert_eq!(sonic.show_speculative, Some(true));
        let reconnection = sonic.reconnection.unwrap();
        assert_eq!(reconnection.max_attempts, 5);
        assert!(!reconnection.jitter);
        // unspecified fields keep their defaults
        assert_eq!(reconnection.initial_delay_ms, 500);

        let tools = config.tools.unwrap();
        assert_eq!(tools.set, Some(ToolSet::All));
        assert_eq!(tools.timeout_ms, Some(2500));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
server:
  port: 9000
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.unwrap().port, Some(9000));
        assert!(config.aws.is_none());
        assert!(config.sonic.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_yaml_config_rejects_unknown_voice() {
        let yaml = r#"
sonic:
  voice: "alloy"
"#;
        assert!(serde_yaml::from_str::<YamlConfig>(yaml).is_err());
    }

    #[test]
    fn test_from_file_errors() {
        let missing = PathBuf::from("/nonexistent/config.yaml");
        let err = YamlConfig::from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "server: [unclosed").unwrap();
        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}
