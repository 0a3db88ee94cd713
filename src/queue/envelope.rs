//! Event envelope wire format
//!
//! Every message on the channel is a JSON object `{"type": "<EventType>", "body": {...}}`.
//! The idempotency key is derived from the type and a canonical rendering of
//! the body (object keys sorted), so the same logical event always hashes the
//! same regardless of how the producer ordered its fields.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::Result;

/// Known envelope types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    CompleteMission,
    PurchaseTitle,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CompleteMission => "CompleteMission",
            EventType::PurchaseTitle => "PurchaseTitle",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `CompleteMission` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMissionBody {
    pub user_id: i64,
    pub mission_id: i64,
}

/// Body of a `PurchaseTitle` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseTitleBody {
    pub user_id: i64,
    pub title_id: i64,
    pub cost: i64,
    /// Title name, carried for the confirmation message
    pub title: String,
}

/// Envelope as carried on the channel
///
/// `event_type` stays a plain string so that envelopes of types this build
/// does not know still decode and can be discarded cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub body: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(event_type: EventType, body: &T) -> Result<Self> {
        Ok(Self {
            event_type: event_type.as_str().to_string(),
            body: serde_json::to_value(body)?,
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize the body into a typed struct
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// SHA-256 over `type` and the canonical body, hex encoded
    pub fn idempotency_key(&self) -> String {
        let mut canonical = String::new();
        write_canonical(&self.body, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(self.event_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let env = Envelope::new(
            EventType::CompleteMission,
            &CompleteMissionBody {
                user_id: 1,
                mission_id: 5,
            },
        )
        .unwrap();
        let wire: Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(wire, json!({"type": "CompleteMission", "body": {"user_id": 1, "mission_id": 5}}));

        let back = Envelope::decode(&env.encode().unwrap()).unwrap();
        let body: CompleteMissionBody = back.body_as().unwrap();
        assert_eq!(body.mission_id, 5);
    }

    #[test]
    fn test_idempotency_key_ignores_field_order() {
        let a = Envelope::decode(br#"{"type":"CompleteMission","body":{"user_id":1,"mission_id":5}}"#)
            .unwrap();
        let b = Envelope::decode(br#"{"body":{"mission_id":5,"user_id":1},"type":"CompleteMission"}"#)
            .unwrap();
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_eq!(a.idempotency_key().len(), 64);

        let other_type = Envelope {
            event_type: "PurchaseTitle".to_string(),
            body: a.body.clone(),
        };
        assert_ne!(a.idempotency_key(), other_type.idempotency_key());
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        let env = Envelope::decode(br#"{"type":"RefundOrder","body":{}}"#).unwrap();
        assert_eq!(env.event_type, "RefundOrder");
        assert!(Envelope::decode(b"not json").is_err());
    }
}
