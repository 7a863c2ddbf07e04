use crate::Result;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub struct JsonSerializer;

impl JsonSerializer {
    pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(payload)?))
    }

    pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
        serde_json::from_slice(payload).map_err(Into::into)
    }
}

/// How a received payload is presented in logs.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadView {
    Json(Value),
    /// Valid UTF-8 that is not JSON.
    Text(String),
    /// Anything else, base64-encoded.
    Binary(String),
}

impl PayloadView {
    pub fn inspect(payload: &[u8]) -> Self {
        if let Ok(value) = serde_json::from_slice::<Value>(payload) {
            return PayloadView::Json(value);
        }

        match std::str::from_utf8(payload) {
            Ok(text) => PayloadView::Text(text.to_string()),
            Err(_) => {
                PayloadView::Binary(base64::engine::general_purpose::STANDARD.encode(payload))
            }
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, PayloadView::Json(_))
    }
}
