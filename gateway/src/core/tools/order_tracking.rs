//! Simulated order tracking.
//!
//! The status for an order id is drawn from a weighted distribution using a
//! generator seeded from a stable hash of the id, so the same id always
//! tracks the same way on a given day.

use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeDelta};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use super::{Tool, ToolSpec};

const STATUSES: [&str; 8] = [
    "Order received",
    "Processing",
    "Preparing for shipment",
    "Shipped",
    "In transit",
    "Out for delivery",
    "Delivered",
    "Delayed",
];

const WEIGHTS: [u32; 8] = [10, 15, 15, 20, 20, 10, 5, 3];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderTrackingTool;

/// Seed derived from the first 8 bytes of SHA-256(order_id), mod 10000.
fn seed_for(order_id: &str) -> u64 {
    let digest = Sha256::digest(order_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 10000
}

fn pick_status(rng: &mut StdRng) -> &'static str {
    match WeightedIndex::new(WEIGHTS) {
        Ok(dist) => STATUSES[dist.sample(rng)],
        Err(_) => STATUSES[0],
    }
}

/// Tracking information for `order_id` as of `today`.
pub fn track_order(order_id: &str, request_notifications: bool, today: NaiveDate) -> Value {
    let order_id = order_id.trim();
    if order_id.is_empty() {
        return json!({
            "error": "Invalid order ID format",
            "orderStatus": "",
            "estimatedDelivery": "",
            "lastUpdate": "",
        });
    }

    let mut rng = StdRng::seed_from_u64(seed_for(order_id));
    let status = pick_status(&mut rng);

    let mut info = Map::new();
    info.insert("orderStatus".into(), json!(status));
    info.insert("orderNumber".into(), json!(order_id));
    info.insert(
        "lastUpdate".into(),
        json!(today.format(DATE_FORMAT).to_string()),
    );

    match status {
        "Delivered" => {
            let days_ago = rng.random_range(0..=3);
            let delivered = today - TimeDelta::days(days_ago);
            info.insert(
                "deliveredOn".into(),
                json!(delivered.format(DATE_FORMAT).to_string()),
            );
            info.insert("deliveryLocation".into(), json!("Front Door"));
        }
        "Out for delivery" => {
            info.insert("expectedDelivery".into(), json!("Today"));
        }
        _ => {
            let days_ahead = rng.random_range(1..=10);
            let estimated = today + TimeDelta::days(days_ahead);
            info.insert(
                "estimatedDelivery".into(),
                json!(estimated.format(DATE_FORMAT).to_string()),
            );
        }
    }

    match status {
        "In transit" => {
            info.insert("currentLocation".into(), json!("Distribution Center"));
        }
        "Delayed" => {
            info.insert("additionalInfo".into(), json!("Weather delays possible"));
        }
        _ => {}
    }

    if request_notifications && status != "Delivered" {
        info.insert(
            "notificationStatus".into(),
            json!(format!("You will receive notifications for order {order_id}")),
        );
    }

    Value::Object(info)
}

#[async_trait]
impl Tool for OrderTrackingTool {
    fn name(&self) -> &str {
        "trackOrderTool"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Retrieves real-time order tracking information and detailed status updates \
                for customer orders by order ID. Provides estimated delivery dates. Use this tool when \
                customers ask about their order status or delivery timeline."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "orderId": {
                        "type": "string",
                        "description": "The order number or ID to track"
                    },
                    "requestNotifications": {
                        "type": "boolean",
                        "description": "Whether to set up notifications for this order",
                        "default": false
                    }
                },
                "required": ["orderId"]
            }),
        }
    }

    async fn call(&self, input: Value) -> Value {
        // the model sends ids as strings or bare numbers
        let order_id = match input.get("orderId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let request_notifications = input
            .get("requestNotifications")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        track_order(&order_id, request_notifications, Local::now().date_naive())
    }
}
