//! JSON-RPC 2.0 message model and parsing.
//!
//! # JSON-RPC 2.0 Compliance
//!
//! - Requests have `id`, `method`, and optional `params`
//! - Notifications are requests without `id`
//! - Responses carry exactly one of `result` or `error`
//! - `id` type (string or integer) MUST be preserved in responses
//!
//! Batches are not handled here; every payload is a single message. A stream
//! decoder that cannot make sense of a payload hands the pipeline a
//! [`Message::Invalid`], which the pipeline drops.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::RpcError;
use crate::error::jsonrpc::ResponseError;

/// JSON-RPC 2.0 version constant.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Fast Correlation ID Generator
// ============================================================================

/// Startup prefix derived from a single Uuid::new_v4() call.
static CORRELATION_PREFIX: LazyLock<u64> = LazyLock::new(|| {
    let seed = Uuid::new_v4().as_u128();
    (seed >> 64) as u64
});

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a correlation ID for one dispatched invocation.
///
/// Combines a process-unique prefix with a monotonically increasing counter,
/// so only the first call pays for the CSPRNG. The result carries valid v4
/// version and RFC 4122 variant bits.
pub fn fast_correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = ((prefix as u128) << 64) | (counter as u128);
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

// ============================================================================
// Message IDs
// ============================================================================

/// JSON-RPC 2.0 request ID.
///
/// The protocol allows string or integer IDs. The exact type is preserved so
/// that responses echo what the caller sent: `"id": 1` is answered with
/// `"id": 1`, never `"id": "1"`.
///
/// A missing `id` (notification) is modelled as `Option<MessageId>::None`;
/// an explicit `"id": null` is [`MessageId::Null`] and still expects a
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID (e.g., `"id": null`)
    Null,
}

impl MessageId {
    /// Convert a JSON value into an ID.
    ///
    /// Accepts string, integer, or null. Floats, booleans, arrays and objects
    /// are rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(MessageId::Number),
            Value::String(s) => Some(MessageId::String(s.clone())),
            Value::Null => Some(MessageId::Null),
            _ => None,
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        MessageId::Number(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId::String(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId::String(value)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::String(s) => write!(f, "\"{s}\""),
            MessageId::Null => f.write_str("null"),
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MessageId::Number(n) => serializer.serialize_i64(*n),
            MessageId::String(s) => serializer.serialize_str(s),
            MessageId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        MessageId::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom("JSON-RPC ID must be string, integer, or null")
        })
    }
}

/// Wrapper to distinguish between a missing field and an explicit null.
#[derive(Debug, Clone, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Explicit `"id": null` becomes `Some(MessageId::Null)`; a missing field is `None`.
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<MessageId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(MessageId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Request parameters: ordered (positional) or named.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Params {
    /// `"params": [..]`
    Positional(Vec<Value>),
    /// `"params": {..}`
    Named(Map<String, Value>),
}

impl Params {
    /// Interpret a JSON value as structured params.
    ///
    /// Only arrays and objects are structured; anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        match value {
            Value::Array(items) => Ok(Params::Positional(items)),
            Value::Object(map) => Ok(Params::Named(map)),
            other => Err(RpcError::InvalidRequest {
                details: format!("params must be an array or object, got {}", type_name(&other)),
            }),
        }
    }

    /// Look up a parameter by position (positional) or by name (named).
    pub fn get(&self, position: usize, name: &str) -> Option<&Value> {
        match self {
            Params::Positional(items) => items.get(position),
            Params::Named(map) => map.get(name),
        }
    }

    /// Number of supplied parameters.
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(items) => items.len(),
            Params::Named(map) => map.len(),
        }
    }

    /// Returns true when no parameters were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Params::Positional(items) => Value::Array(items),
            Params::Named(map) => Value::Object(map),
        }
    }
}

/// Validated JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMessage {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request ID (None for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl RequestMessage {
    /// Create a request that expects a response.
    pub fn request(id: impl Into<MessageId>, method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response).
    pub fn notification(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Returns true if this is a notification (no ID).
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

// ============================================================================
// Responses
// ============================================================================

/// JSON-RPC 2.0 response.
///
/// The `id` field always serializes: `None` becomes `"id": null`. This
/// differs from [`RequestMessage`] where `None` means "notification" and the
/// field is omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMessage {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request ID, echoed from the request
    pub id: Option<MessageId>,
    /// Result (mutually exclusive with error). A `null` result is `Some(Value::Null)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// Create a success response.
    pub fn success(id: Option<MessageId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    ///
    /// Pass `None` as the id when the request id could not be determined
    /// (e.g., parse error); it serializes as `"id": null`.
    pub fn error(id: Option<MessageId>, error: ResponseError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns true if this response carries an error object.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Any inbound message a pipeline may be handed.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request or notification.
    Request(RequestMessage),
    /// A response to an earlier request.
    Response(ResponseMessage),
    /// A payload that could not be understood.
    Invalid {
        /// The id, if one could be recovered from the payload.
        id: Option<MessageId>,
        /// Why the payload was rejected.
        reason: String,
    },
}

impl Message {
    /// Decode a payload, turning any failure into [`Message::Invalid`].
    pub fn decode(bytes: &[u8]) -> Self {
        match parse_message(bytes) {
            Ok(message) => message,
            Err(error) => Message::Invalid {
                id: recover_id(bytes),
                reason: error.to_string(),
            },
        }
    }

    /// Encode a request or response as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::InvalidRequest` for [`Message::Invalid`], and
    /// `RpcError::InternalError` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, RpcError> {
        let encoded = match self {
            Message::Request(request) => serde_json::to_vec(request),
            Message::Response(response) => serde_json::to_vec(response),
            Message::Invalid { reason, .. } => {
                return Err(RpcError::InvalidRequest {
                    details: reason.clone(),
                });
            }
        };
        encoded.map_err(|e| RpcError::InternalError {
            details: format!("failed to encode message: {e}"),
        })
    }

    /// Returns the request, if this message is one.
    pub fn as_request(&self) -> Option<&RequestMessage> {
        match self {
            Message::Request(request) => Some(request),
            _ => None,
        }
    }
}

impl From<RequestMessage> for Message {
    fn from(request: RequestMessage) -> Self {
        Message::Request(request)
    }
}

impl From<ResponseMessage> for Message {
    fn from(response: ResponseMessage) -> Self {
        Message::Response(response)
    }
}

/// Raw JSON-RPC 2.0 message as received on the wire.
///
/// All fields are optional so that malformed messages can be reported
/// precisely instead of failing deserialization wholesale.
#[derive(Debug, Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<MessageId>,
    method: Option<String>,
    params: Option<Value>,
    #[serde(default)]
    result: MaybeNull<Value>,
    error: Option<ResponseError>,
}

/// Parse JSON bytes into a single JSON-RPC 2.0 message.
///
/// # Returns
///
/// * `Ok(Message::Request)` - a request or notification
/// * `Ok(Message::Response)` - a response with exactly one of result/error
/// * `Err(RpcError::ParseError)` - malformed JSON (-32700)
/// * `Err(RpcError::InvalidRequest)` - valid JSON, invalid JSON-RPC (-32600)
pub fn parse_message(bytes: &[u8]) -> Result<Message, RpcError> {
    let first_byte = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| RpcError::ParseError {
            details: "Invalid JSON: empty input".to_string(),
        })?;

    if *first_byte != b'{' {
        // Parse anyway so malformed input gets a proper serde message.
        return serde_json::from_slice::<Value>(bytes)
            .map_err(|e| RpcError::ParseError {
                details: format!("Invalid JSON: {e}"),
            })
            .and_then(|_| {
                Err(RpcError::InvalidRequest {
                    details: "Message must be a JSON object".to_string(),
                })
            });
    }

    let raw: RawMessage = serde_json::from_slice(bytes).map_err(|e| {
        // Syntax errors are bad JSON; everything else is bad field values.
        if e.is_syntax() || e.is_eof() {
            RpcError::ParseError {
                details: format!("Invalid JSON: {e}"),
            }
        } else {
            RpcError::InvalidRequest {
                details: format!("Invalid JSON-RPC structure: {e}"),
            }
        }
    })?;

    classify(raw)
}

fn classify(raw: RawMessage) -> Result<Message, RpcError> {
    match raw.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(v) => {
            return Err(RpcError::InvalidRequest {
                details: format!("Invalid jsonrpc version: expected \"2.0\", got \"{v}\""),
            });
        }
        None => {
            return Err(RpcError::InvalidRequest {
                details: "Missing required field: jsonrpc".to_string(),
            });
        }
    }

    if let Some(method) = raw.method {
        let params = match raw.params {
            None | Some(Value::Null) => None,
            Some(value) => Some(Params::from_value(value)?),
        };
        return Ok(Message::Request(RequestMessage {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: raw.id,
            method,
            params,
        }));
    }

    let result = match raw.result {
        MaybeNull::Absent => None,
        MaybeNull::Null => Some(Value::Null),
        MaybeNull::Present(value) => Some(value),
    };

    match (result, raw.error) {
        (Some(result), None) => Ok(Message::Response(ResponseMessage::success(raw.id, result))),
        (None, Some(error)) => Ok(Message::Response(ResponseMessage::error(raw.id, error))),
        (Some(_), Some(_)) => Err(RpcError::InvalidRequest {
            details: "Response must not carry both result and error".to_string(),
        }),
        (None, None) => Err(RpcError::InvalidRequest {
            details: "Message has neither method nor result/error".to_string(),
        }),
    }
}

/// Best-effort id extraction from a payload that failed validation.
///
/// Returns `None` when the payload is not a JSON object or its `id` is not a
/// valid JSON-RPC id.
pub fn recover_id(bytes: &[u8]) -> Option<MessageId> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.as_object()?.get("id").and_then(MessageId::from_value)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
