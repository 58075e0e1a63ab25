use std::env;
use std::error::Error;
use std::str::FromStr;

use super::ServerConfig;
use crate::core::sonic::{DEFAULT_REGION, SonicConfig, SonicVoice};
use crate::core::tools::{ToolSet, ToolSettings};

/// Read a variable, treating empty values as unset.
pub(super) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>, Box<dyn Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| -> Box<dyn Error> { format!("Invalid {name} value '{raw}': {e}").into() }),
        None => Ok(None),
    }
}

pub(super) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Build the configuration from environment variables and defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn Error>> {
    let host = env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = parse_env::<u16>("PORT")?.unwrap_or(8081);

    let aws_region = env_var("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());

    let mut sonic = SonicConfig {
        region: aws_region.clone(),
        ..Default::default()
    };
    if let Some(model_id) = env_var("SONIC_MODEL_ID") {
        sonic.model_id = model_id;
    }
    if let Some(voice) = env_var("SONIC_VOICE") {
        sonic.voice = SonicVoice::parse(&voice).map_err(|e| format!("Invalid SONIC_VOICE: {e}"))?;
    }
    if let Some(raw) = env_var("SONIC_SHOW_SPECULATIVE") {
        sonic.show_speculative = parse_bool(&raw)
            .ok_or_else(|| format!("Invalid SONIC_SHOW_SPECULATIVE value '{raw}'"))?;
    }

    let mut tools = ToolSettings::default();
    if let Some(set) = env_var("SONIC_TOOLS") {
        tools.set = ToolSet::parse(&set).map_err(|e| format!("Invalid SONIC_TOOLS: {e}"))?;
    }
    if let Some(url) = env_var("WEATHER_API_BASE_URL") {
        tools.weather_base_url = url;
    }
    if let Some(url) = env_var("TIME_API_BASE_URL") {
        tools.time_base_url = url;
    }
    if let Some(timeout_ms) = parse_env::<u64>("TOOL_TIMEOUT_MS")? {
        tools.timeout_ms = timeout_ms;
    }

    Ok(ServerConfig {
        host,
        port,
        aws_region,
        aws_access_key_id: env_var("AWS_ACCESS_KEY_ID"),
        aws_secret_access_key: env_var("AWS_SECRET_ACCESS_KEY"),
        aws_session_token: env_var("AWS_SESSION_TOKEN"),
        sonic,
        tools,
        cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
        max_sessions: parse_env::<usize>("MAX_SESSIONS")?,
    })
}
