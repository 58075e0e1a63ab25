use std::error::Error;

use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Environment configuration with YAML values applied on top.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if server.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = server.cors_allowed_origins;
        }
        if server.max_sessions.is_some() {
            config.max_sessions = server.max_sessions;
        }
    }

    if let Some(aws) = yaml.aws {
        if let Some(region) = aws.region {
            config.aws_region = region.clone();
            config.sonic.region = region;
        }
        if aws.access_key_id.is_some() {
            config.aws_access_key_id = aws.access_key_id;
        }
        if aws.secret_access_key.is_some() {
            config.aws_secret_access_key = aws.secret_access_key;
        }
        if aws.session_token.is_some() {
            config.aws_session_token = aws.session_token;
        }
    }

    if let Some(sonic) = yaml.sonic {
        let target = &mut config.sonic;
        if let Some(model_id) = sonic.model_id {
            target.model_id = model_id;
        }
        if let Some(voice) = sonic.voice {
            target.voice = voice;
        }
        if sonic.system_prompt.is_some() {
            target.system_prompt = sonic.system_prompt;
        }
        if let Some(show) = sonic.show_speculative {
            target.show_speculative = show;
        }
        if let Some(max_tokens) = sonic.max_tokens {
            target.inference.max_tokens = max_tokens;
        }
        if let Some(top_p) = sonic.top_p {
            target.inference.top_p = top_p;
        }
        if let Some(temperature) = sonic.temperature {
            target.inference.temperature = temperature;
        }
        if let Some(cooldown) = sonic.dedup_cooldown_ms {
            target.dedup_cooldown_ms = cooldown;
        }
        if let Some(threshold) = sonic.audio_buffer_threshold {
            target.audio_buffer_threshold = threshold;
        }
        if let Some(budget) = sonic.max_consecutive_decode_failures {
            target.max_consecutive_decode_failures = budget;
        }
        if let Some(reconnection) = sonic.reconnection {
            target.reconnection = reconnection;
        }
    }

    if let Some(tools) = yaml.tools {
        if let Some(set) = tools.set {
            config.tools.set = set;
        }
        if let Some(url) = tools.weather_base_url {
            config.tools.weather_base_url = url;
        }
        if let Some(url) = tools.time_base_url {
            config.tools.time_base_url = url;
        }
        if let Some(timeout_ms) = tools.timeout_ms {
            config.tools.timeout_ms = timeout_ms;
        }
    }

    Ok(config)
}
