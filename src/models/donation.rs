use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection state of the realtime donation channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}

/// A single monetary contribution notification from the donation platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationEvent {
    /// Sender display name
    pub username: String,
    /// Contributed amount in `currency`
    pub amount: f64,
    pub currency: String,
    /// Free-text message attached to the donation (may carry video links)
    pub message: String,
    /// Arrival timestamp in milliseconds since Unix epoch
    pub timestamp: i64,
    pub is_test: bool,
}

impl DonationEvent {
    pub fn new(username: String, amount: f64, currency: String, message: String) -> Self {
        Self {
            username,
            amount,
            currency,
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_test: false,
        }
    }

    /// Simulated donation used to exercise the admission pipeline without a
    /// live connection
    pub fn test(username: &str, amount: f64, message: &str) -> Self {
        Self {
            is_test: true,
            ..Self::new(
                username.to_string(),
                amount,
                "RUB".to_string(),
                message.to_string(),
            )
        }
    }

    /// Decode a donation from the provider's publication payload.
    ///
    /// Amounts arrive as either numbers or strings depending on the alert
    /// revision; unparsable values become 0.0 so threshold filters fail
    /// predictably instead of auto-passing.
    pub fn from_payload(payload: &Value) -> Self {
        let amount = match &payload["amount"] {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };

        Self {
            username: payload["username"]
                .as_str()
                .filter(|s| !s.is_empty())
                .unwrap_or("Anonymous")
                .to_string(),
            amount,
            currency: payload["currency"].as_str().unwrap_or("").to_string(),
            message: payload["message"].as_str().unwrap_or("").to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_test: payload["is_test"].as_bool().unwrap_or(false)
                || payload["is_test"].as_i64() == Some(1),
        }
    }
}
