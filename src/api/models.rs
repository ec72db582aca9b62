// src/api/models.rs
// Wire types for the signal backend

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Neutral direction used when the backend omits the signal label
pub const DIRECTION_WAIT: &str = "wait";

/// Notification channel settings stored on the backend. Unset fields
/// serialize as an explicit `null` so the backend can tell "unset" apart
/// from "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    pub telegram_token: Option<String>,
    pub chat_id: Option<String>,
}

impl BotConfig {
    /// Empty operator input means "unset", not an empty credential
    pub fn new(telegram_token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            telegram_token: telegram_token.filter(|value| !value.trim().is_empty()),
            chat_id: chat_id.filter(|value| !value.trim().is_empty()),
        }
    }
}

/// Body of an on-demand analysis request
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub symbol: String,
    pub interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_send: Option<bool>,
}

impl AnalyzeRequest {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            broker: None,
            auto_send: None,
        }
    }
}

/// Raw analysis response. Field names differ between backend versions, so
/// the decode is deliberately tolerant; normalization happens in
/// [`Signal::from_payload`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalPayload {
    #[serde(default, alias = "signal")]
    pub direction: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// A single normalized analysis result. Replaced wholesale by the next
/// successful call, never partially updated.
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: String,
    /// Signal label as reported by the backend (e.g. BUY/SELL), defaulting
    /// to [`DIRECTION_WAIT`] when absent
    pub direction: String,
    /// Backend certainty, clamped to 0-100 on receipt
    pub confidence: f64,
    pub price: Option<f64>,
    /// Unix timestamp of when the client received the signal
    pub received_at: i64,
}

impl Signal {
    pub fn from_payload(payload: SignalPayload, requested_symbol: &str) -> Self {
        let direction = payload
            .direction
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| DIRECTION_WAIT.to_string());

        let confidence = payload.confidence.unwrap_or(0.0).clamp(0.0, 100.0);

        Self {
            symbol: payload
                .symbol
                .unwrap_or_else(|| requested_symbol.to_string()),
            direction,
            confidence,
            price: payload.price,
            received_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Liveness response from the status endpoint. Some backends answer with
/// `{"ok": true}`, others with `{"status": "ok"}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        if let Some(ok) = self.ok {
            return ok;
        }
        matches!(
            self.status.as_deref().map(str::to_lowercase).as_deref(),
            Some("ok") | Some("online") | Some("running")
        )
    }
}

/// Enable/disable acknowledgements sometimes echo the authoritative flag
pub fn reported_active(ack: &Value) -> Option<bool> {
    ack.get("active").and_then(Value::as_bool)
}
