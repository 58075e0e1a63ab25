use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::{America::Los_Angeles, Tz};
use serde_json::{Value, json};

use super::{Tool, ToolSpec};

/// Current date and time in America/Los_Angeles.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeTool;

/// Tool result for the given instant.
pub fn date_and_time_at(now: DateTime<Tz>) -> Value {
    json!({
        "formattedTime": now.format("%I:%M %p").to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
        "year": now.year(),
        "month": now.month(),
        "day": now.day(),
        "dayOfWeek": now.format("%A").to_string().to_uppercase(),
        "timezone": "PST",
    })
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "getDateAndTimeTool"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "get information about the current date and time".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    async fn call(&self, _input: Value) -> Value {
        date_and_time_at(Utc::now().with_timezone(&Los_Angeles))
    }
}
