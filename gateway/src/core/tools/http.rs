//! HTTP-backed companion tools: current weather and world time.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::{Tool, ToolSpec};

fn location_param(input: &Value) -> Option<&str> {
    input
        .get("location")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|loc| !loc.is_empty())
}

fn location_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "location": {
                "type": "string",
                "description": description
            }
        },
        "required": ["location"]
    })
}

// =============================================================================
// Weather
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct WttrResponse {
    #[serde(default)]
    current_condition: Vec<WttrCondition>,
}

#[derive(Debug, Default, Deserialize)]
struct WttrCondition {
    #[serde(rename = "temp_C")]
    temp_c: Option<String>,
    #[serde(rename = "temp_F")]
    temp_f: Option<String>,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<WttrValue>,
    humidity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WttrValue {
    value: Option<String>,
}

/// Current weather from a wttr.in-compatible service.
#[derive(Debug, Clone)]
pub struct WeatherTool {
    client: Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, location: &str) -> Result<String, String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| format!("invalid base URL {}", self.base_url))?
            .pop_if_empty()
            .push(location);
        url.query_pairs_mut().append_pair("format", "j1");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(status.to_string());
        }

        let body: WttrResponse = response.json().await.map_err(|e| e.to_string())?;
        let current = body.current_condition.into_iter().next().unwrap_or_default();
        let desc = current
            .weather_desc
            .into_iter()
            .next()
            .and_then(|d| d.value)
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(format!(
            "Weather in {location}: {desc}, {}°C ({}°F), Humidity: {}%",
            current.temp_c.as_deref().unwrap_or("N/A"),
            current.temp_f.as_deref().unwrap_or("N/A"),
            current.humidity.as_deref().unwrap_or("N/A"),
        ))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Get the current weather for a location".to_string(),
            input_schema: location_schema("The city and state, e.g. San Francisco, CA"),
        }
    }

    async fn call(&self, input: Value) -> Value {
        let Some(location) = location_param(&input) else {
            return json!({ "error": "Location parameter is required" });
        };
        match self.fetch(location).await {
            Ok(result) => json!({ "result": result }),
            Err(e) => {
                warn!(location, "Weather lookup failed: {}", e);
                json!({ "error": format!("Failed to get weather: {e}") })
            }
        }
    }
}

// =============================================================================
// World time
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeApiResponse {
    time: Option<String>,
    date: Option<String>,
    day_of_week: Option<String>,
}

/// Current time in a IANA time zone from a timeapi.io-compatible service.
#[derive(Debug, Clone)]
pub struct TimeTool {
    client: Client,
    base_url: String,
}

impl TimeTool {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, location: &str) -> Result<String, String> {
        let response = self
            .client
            .get(format!("{}/api/Time/current/zone", self.base_url))
            .query(&[("timeZone", location)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(status.to_string());
        }

        let body: TimeApiResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "Current time in {location}: {} on {}, {}",
            body.time.as_deref().unwrap_or("Unknown"),
            body.day_of_week.as_deref().unwrap_or("Unknown"),
            body.date.as_deref().unwrap_or("Unknown"),
        ))
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Get the current time for a location".to_string(),
            input_schema: location_schema("The timezone or location, e.g. America/New_York"),
        }
    }

    async fn call(&self, input: Value) -> Value {
        let Some(location) = location_param(&input) else {
            return json!({ "error": "Location parameter is required" });
        };
        match self.fetch(location).await {
            Ok(result) => json!({ "result": result }),
            Err(e) => {
                warn!(location, "Time lookup failed: {}", e);
                json!({ "error": format!("Failed to get time: {e}") })
            }
        }
    }
}
