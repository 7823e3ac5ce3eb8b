//! The request/response protocol shared with the settings panel and the
//! background process. Requests are JSON records tagged by an `action`
//! field; responses are JSON records. Unknown or malformed requests answer
//! `{success:false, message}` instead of failing silently.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Reinitialize { settings: Value },
    GetVideoFormats,
    GetAudioFormats,
    UpdateBlockedCount {
        #[serde(default = "default_count")]
        count: u64,
    },
    GetStatistics,
    IncrementSession,
    BatchUpdate { updates: Value },
}

fn default_count() -> u64 {
    1
}

/// Decodes a raw request, or `Err` with the ready-to-send failure response.
pub fn parse_request(raw: Value) -> Result<Request, Value> {
    serde_json::from_value(raw).map_err(|e| failure(format!("invalid request: {}", e)))
}

pub fn success() -> Value {
    json!({ "success": true })
}

pub fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "message": message.into() })
}
