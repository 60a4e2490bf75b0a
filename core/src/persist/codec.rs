//! Text codecs and the expiry envelope.
//!
//! A `Codec` turns a value into the text written to storage and back. The
//! `PersistenceCodec` wraps one with the optional `{timestamp, state}`
//! envelope used when persisted data has a maximum age.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use tracing::info;

use crate::error::StoreError;

/// Envelope field carrying the write time in epoch milliseconds.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Envelope field carrying the wrapped payload.
pub const STATE_FIELD: &str = "state";

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serialization used for persisted text.
pub trait Codec: Send + Sync {
    fn serialize(&self, data: &Value) -> Result<String, StoreError>;
    fn deserialize(&self, text: &str) -> Result<Value, StoreError>;
}

/// Compact JSON text. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize(&self, data: &Value) -> Result<String, StoreError> {
        Ok(serde_json::to_string(data)?)
    }

    fn deserialize(&self, text: &str) -> Result<Value, StoreError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// YAML text, for slots meant to be read or edited by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn serialize(&self, data: &Value) -> Result<String, StoreError> {
        Ok(serde_yaml::to_string(data)?)
    }

    fn deserialize(&self, text: &str) -> Result<Value, StoreError> {
        Ok(serde_yaml::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// PersistenceCodec
// ---------------------------------------------------------------------------

/// A codec plus the expiry policy.
#[derive(Clone)]
pub struct PersistenceCodec {
    codec: Arc<dyn Codec>,
    max_age_ms: Option<u64>,
}

impl PersistenceCodec {
    pub fn new(codec: Arc<dyn Codec>, max_age_ms: Option<u64>) -> Self {
        PersistenceCodec { codec, max_age_ms }
    }

    /// JSON codec, no expiry.
    pub fn json() -> Self {
        Self::new(Arc::new(JsonCodec), None)
    }

    /// Serialize `data`, enveloped with `now_ms` when a max age is set.
    pub fn serialize_at(&self, data: &Value, now_ms: u64) -> Result<String, StoreError> {
        match self.max_age_ms {
            Some(_) => {
                let mut envelope = Map::new();
                envelope.insert(TIMESTAMP_FIELD.to_string(), Value::from(now_ms));
                envelope.insert(STATE_FIELD.to_string(), data.clone());
                self.codec.serialize(&Value::Object(envelope))
            }
            None => self.codec.serialize(data),
        }
    }

    /// Parse text written by [`PersistenceCodec::serialize_at`].
    ///
    /// With a max age set and a `timestamp` present, data older than the
    /// max age comes back as an empty object; fresh data is unwrapped.
    /// Anything else is returned exactly as parsed.
    pub fn deserialize_at(&self, text: &str, now_ms: u64) -> Result<Value, StoreError> {
        let parsed = self.codec.deserialize(text)?;
        let Some(max_age) = self.max_age_ms else {
            return Ok(parsed);
        };
        let Value::Object(mut envelope) = parsed else {
            return Ok(parsed);
        };
        let Some(timestamp) = envelope.get(TIMESTAMP_FIELD).and_then(Value::as_f64) else {
            return Ok(Value::Object(envelope));
        };

        let age = now_ms as f64 - timestamp;
        if age > max_age as f64 {
            info!(age_ms = age, max_age_ms = max_age, "persisted data expired");
            return Ok(Value::Object(Map::new()));
        }
        Ok(envelope.remove(STATE_FIELD).unwrap_or(Value::Null))
    }

    pub fn serialize(&self, data: &Value) -> Result<String, StoreError> {
        self.serialize_at(data, now_ms())
    }

    pub fn deserialize(&self, text: &str) -> Result<Value, StoreError> {
        self.deserialize_at(text, now_ms())
    }
}

impl std::fmt::Debug for PersistenceCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCodec")
            .field("max_age_ms", &self.max_age_ms)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
