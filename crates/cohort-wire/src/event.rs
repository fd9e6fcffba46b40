//! Discrete event envelopes
//!
//! Events carry one-shot occurrences (e.g. an annotation marker activated)
//! that every viewer must observe, as opposed to continuous transform state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged `{type, data}` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_uses_type_field() {
        let envelope = EventEnvelope::new("hotspot-activated", json!({ "id": "valve" }));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "hotspot-activated");
        assert_eq!(value["data"]["id"], "valve");
    }

    #[test]
    fn test_missing_data_is_null() {
        let envelope: EventEnvelope = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(envelope.kind, "reset");
        assert!(envelope.data.is_null());
    }
}
