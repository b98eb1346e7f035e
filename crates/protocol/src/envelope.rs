//! The universal message envelope.
//!
//! Serialized as compact JSON with stable field order. Decoding is lenient:
//! unknown fields are ignored so newer controllers can talk to older agents,
//! and a missing timestamp is stamped at receipt. `id` and `type` are the
//! only hard requirements; their absence fails with a protocol error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ad_domain::error::AgentError;

/// Millisecond epoch now.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Event,
    StreamStart,
    StreamData,
    StreamEnd,
    Cancel,
}

/// Optional request metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Advisory timeout; polling handlers derive their deadline from it.
    #[serde(
        rename = "timeoutMs",
        alias = "timeout_ms",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub priority: Option<String>,
    #[serde(
        rename = "traceId",
        alias = "trace_id",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub trace_id: Option<String>,
}

/// Error object carried in a failure response. Category and recoverable are
/// derived from the code at construction; the tables are frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: u16,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
    pub recoverable: bool,
    #[serde(
        rename = "suggestedAction",
        alias = "suggested_action",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub suggested_action: Option<String>,
}

impl From<&AgentError> for WireError {
    fn from(e: &AgentError) -> Self {
        Self {
            code: e.code,
            category: e.category().as_str().to_string(),
            message: e.message.clone(),
            details: e.details.clone(),
            recoverable: e.recoverable(),
            suggested_action: e.suggested_action.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque request-scoped id; echoed verbatim in the matching response.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Dotted method name. Required on requests and events; advisory on
    /// responses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<WireError>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Metadata>,
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

impl Envelope {
    pub fn request(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: MessageType::Request,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
            metadata: None,
            timestamp: now_millis(),
        }
    }

    pub fn event(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: MessageType::Event,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
            metadata: None,
            timestamp: now_millis(),
        }
    }

    /// Success response echoing the request's id and method.
    pub fn response_to(request: &Envelope, result: Value) -> Self {
        Self {
            id: request.id.clone(),
            kind: MessageType::Response,
            method: request.method.clone(),
            params: None,
            result: Some(result),
            error: None,
            metadata: None,
            timestamp: now_millis(),
        }
    }

    /// Failure response echoing the request's id and method.
    pub fn error_response(request: &Envelope, error: &AgentError) -> Self {
        Self {
            id: request.id.clone(),
            kind: MessageType::Response,
            method: request.method.clone(),
            params: None,
            result: None,
            error: Some(WireError::from(error)),
            metadata: None,
            timestamp: now_millis(),
        }
    }

    /// Failure response for a request whose envelope never decoded; the
    /// salvaged id (or an empty string) keeps the one-response invariant.
    pub fn error_for_id(id: impl Into<String>, error: &AgentError) -> Self {
        Self {
            id: id.into(),
            kind: MessageType::Response,
            method: None,
            params: None,
            result: None,
            error: Some(WireError::from(error)),
            metadata: None,
            timestamp: now_millis(),
        }
    }

    pub fn encode(&self) -> String {
        // The envelope schema contains nothing unserializable.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"id\":\"{}\",\"type\":\"response\",\"error\":{{\"code\":9999,\
                 \"category\":\"INTERNAL\",\"message\":\"encode failed: {e}\",\
                 \"recoverable\":false}},\"timestamp\":{}}}",
                self.id,
                now_millis()
            )
        })
    }

    /// Lenient decode: unknown fields ignored, missing `id`/`type` rejected.
    pub fn decode(text: &str) -> Result<Self, AgentError> {
        serde_json::from_str(text)
            .map_err(|e| AgentError::protocol(format!("invalid envelope: {e}")))
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageType::Request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_is_idempotent() {
        let mut env = Envelope::request("ui.click", Some(json!({"x": 10, "y": 20})));
        env.metadata = Some(Metadata {
            timeout_ms: Some(3_000),
            retry: None,
            priority: Some("high".into()),
            trace_id: Some("t-1".into()),
        });
        let text = env.encode();
        let back = Envelope::decode(&text).unwrap();
        assert_eq!(back, env);
        assert_eq!(Envelope::decode(&back.encode()).unwrap(), back);
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let env = Envelope::decode(
            r#"{"id":"R1","type":"request","method":"system.heartbeat",
                "futureField":{"nested":true},"timestamp":5}"#,
        )
        .unwrap();
        assert_eq!(env.id, "R1");
        assert_eq!(env.method.as_deref(), Some("system.heartbeat"));
    }

    #[test]
    fn decode_defaults_missing_timestamp() {
        let env = Envelope::decode(r#"{"id":"R2","type":"request","method":"x.y"}"#).unwrap();
        assert!(env.timestamp > 0);
    }

    #[test]
    fn decode_rejects_missing_required_fields() {
        let e = Envelope::decode(r#"{"type":"request","method":"x.y"}"#).unwrap_err();
        assert_eq!(e.code, 9004);
        let e = Envelope::decode(r#"{"id":"R3","method":"x.y"}"#).unwrap_err();
        assert_eq!(e.code, 9004);
        let e = Envelope::decode("not json at all").unwrap_err();
        assert_eq!(e.code, 9004);
    }

    #[test]
    fn encode_omits_absent_optionals_but_keeps_core_fields() {
        let env = Envelope::event("system.hello", None);
        let text = env.encode();
        let value: Value = serde_json::from_str(&text).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("type"));
        assert!(obj.contains_key("timestamp"));
        assert!(!obj.contains_key("params"));
        assert!(!obj.contains_key("result"));
        assert!(!obj.contains_key("error"));
        assert!(!obj.contains_key("metadata"));
    }

    #[test]
    fn response_carries_exactly_one_of_result_or_error() {
        let req = Envelope::request("system.heartbeat", None);
        let ok = Envelope::response_to(&req, json!({"uptime": 1}));
        assert!(ok.result.is_some() && ok.error.is_none());
        assert_eq!(ok.id, req.id);
        assert_eq!(ok.method, req.method);

        let err = Envelope::error_response(&req, &AgentError::not_implemented("x.y"));
        assert!(err.result.is_none() && err.error.is_some());
        assert_eq!(err.id, req.id);
    }

    #[test]
    fn wire_error_derives_category_and_recoverable() {
        let e = AgentError::element_not_found("Element not found");
        let w = WireError::from(&e);
        assert_eq!(w.code, 4001);
        assert_eq!(w.category, "UI");
        assert!(w.recoverable);

        let e = AgentError::auth_failed("bad token");
        let w = WireError::from(&e);
        assert_eq!(w.category, "TRANSPORT");
        assert!(!w.recoverable);
    }

    #[test]
    fn metadata_accepts_snake_case_aliases() {
        let env = Envelope::decode(
            r#"{"id":"R4","type":"request","method":"ui.waitFor",
                "metadata":{"timeout_ms":250,"trace_id":"abc"}}"#,
        )
        .unwrap();
        let meta = env.metadata.unwrap();
        assert_eq!(meta.timeout_ms, Some(250));
        assert_eq!(meta.trace_id.as_deref(), Some("abc"));
    }
}
