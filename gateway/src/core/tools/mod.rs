//! Tools the model may call during a session.
//!
//! A [`ToolRegistry`] holds the tools offered in `promptStart` and resolves
//! `toolUse` requests by case-insensitive name. Dispatch always yields a JSON
//! object: tool failures, unknown tools, bad input and timeouts are all
//! reported as `{"error": ...}` payloads for the model to read.

mod datetime;
mod http;
mod order_tracking;

pub use datetime::{DateTimeTool, date_and_time_at};
pub use http::{TimeTool, WeatherTool};
pub use order_tracking::{OrderTrackingTool, track_order};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::sonic::{SonicError, SonicResult};

/// Default base URL of the weather service.
pub const DEFAULT_WEATHER_BASE_URL: &str = "https://wttr.in";

/// Default base URL of the world time service.
pub const DEFAULT_TIME_BASE_URL: &str = "https://timeapi.io";

/// Default per-call tool timeout.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 5000;

/// Tool declaration sent in `promptStart`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool input
    pub input_schema: Value,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Run the tool. Failures are returned as `{"error": ...}`.
    async fn call(&self, input: Value) -> Value;
}

/// Named groups of tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSet {
    /// Date/time and order tracking
    #[default]
    OrderSupport,
    /// Weather and world time
    Companion,
    /// Every tool
    All,
    /// No tools
    None,
}

impl ToolSet {
    pub fn parse(s: &str) -> SonicResult<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "order_support" => Ok(Self::OrderSupport),
            "companion" => Ok(Self::Companion),
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            other => Err(SonicError::InvalidConfiguration(format!(
                "Unknown tool set: {other}. Supported: order_support, companion, all, none"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderSupport => "order_support",
            Self::Companion => "companion",
            Self::All => "all",
            Self::None => "none",
        }
    }
}

/// Tool settings from the `tools` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub set: ToolSet,
    pub weather_base_url: String,
    pub time_base_url: String,
    pub timeout_ms: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            set: ToolSet::default(),
            weather_base_url: DEFAULT_WEATHER_BASE_URL.to_string(),
            time_base_url: DEFAULT_TIME_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
        }
    }
}

impl ToolSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Name-indexed set of tools with a shared call timeout.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, for stable `promptStart` output
    order: Vec<String>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout,
        }
    }

    /// An empty registry; `promptStart` then carries no tool configuration.
    pub fn empty() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS))
    }

    /// Build the registry for the configured tool set.
    pub fn from_settings(settings: &ToolSettings) -> SonicResult<Self> {
        let mut registry = Self::new(settings.timeout());

        if matches!(settings.set, ToolSet::OrderSupport | ToolSet::All) {
            registry.register(Arc::new(DateTimeTool));
            registry.register(Arc::new(OrderTrackingTool));
        }

        if matches!(settings.set, ToolSet::Companion | ToolSet::All) {
            let client = reqwest::Client::builder()
                .timeout(settings.timeout())
                .connect_timeout(Duration::from_secs(3))
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .map_err(|e| {
                    SonicError::InvalidConfiguration(format!(
                        "Failed to create HTTP client: {e}"
                    ))
                })?;
            registry.register(Arc::new(WeatherTool::new(
                client.clone(),
                &settings.weather_base_url,
            )));
            registry.register(Arc::new(TimeTool::new(client, &settings.time_base_url)));
        }

        Ok(registry)
    }

    /// Add a tool, replacing any tool with the same (case-insensitive) name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let key = tool.name().to_lowercase();
        if self.tools.insert(key.clone(), tool).is_none() {
            self.order.push(key);
        }
    }

    /// Declarations for `promptStart`, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|key| self.tools.get(key))
            .map(|tool| tool.spec())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|key| self.tools.get(key))
            .map(|tool| tool.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve and run a tool for a `toolUse` event.
    ///
    /// `raw_content` is the JSON-encoded tool input; an empty string is `{}`.
    pub async fn dispatch(&self, name: &str, raw_content: &str) -> Value {
        let input = if raw_content.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(raw_content) {
                Ok(value) => value,
                Err(e) => {
                    warn!(tool = name, "Invalid tool input: {}", e);
                    return json!({ "error": format!("Invalid tool input: {e}") });
                }
            }
        };

        let Some(tool) = self.tools.get(&name.to_lowercase()) else {
            warn!(tool = name, "Unknown tool requested");
            return json!({ "error": format!("Unknown tool: {name}") });
        };

        debug!(tool = name, "Dispatching tool");
        match tokio::time::timeout(self.timeout, tool.call(input)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, "Tool timed out");
                json!({
                    "error": format!("Tool {name} timed out after {}ms", self.timeout.as_millis())
                })
            }
        }
    }
}
