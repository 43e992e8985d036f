//! JSON-RPC 2.0 wire types.
//!
//! Requests and responses are handled as raw JSON wherever possible. The
//! request `id` in particular is carried as an opaque `RawValue` and spliced
//! back into responses byte-for-byte: reparsing it (say, into an integer)
//! would reformat values like `1e2` and break clients that compare ids
//! literally.
//!
//! A missing `id` makes the request a notification that never receives a
//! response body. An explicit `"id": null` is *not* a notification; the
//! stored raw bytes are simply `null`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Invalid Request (-32600): malformed envelope.
pub const INVALID_REQUEST: i32 = -32600;
/// Method not found (-32601).
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid params (-32602): bad `tools/call` params or rejected arguments.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal error (-32603).
pub const INTERNAL_ERROR: i32 = -32603;
/// Implementation-defined server error (-32000).
pub const SERVER_ERROR: i32 = -32000;

/// A JSON-RPC 2.0 request as received on the wire.
///
/// All fields are optional at the serde layer so that envelope problems are
/// reported through [`Request::validate`] rather than as opaque parse
/// failures.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    /// Raw id bytes. `None` only when the field was absent entirely.
    #[serde(default, deserialize_with = "raw_present")]
    pub id: Option<Box<RawValue>>,
    #[serde(default)]
    pub method: String,
    #[serde(default, deserialize_with = "raw_present")]
    pub params: Option<Box<RawValue>>,
}

/// Envelope-level validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("jsonrpc must be 2.0")]
    Version,
    #[error("method is required")]
    EmptyMethod,
}

impl Request {
    /// Check the fixed envelope fields.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.jsonrpc != "2.0" {
            return Err(EnvelopeError::Version);
        }
        if self.method.is_empty() {
            return Err(EnvelopeError::EmptyMethod);
        }
        Ok(())
    }

    /// True when the `id` field was absent, i.e. no response may be emitted.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Deserialize a field into raw bytes, keeping an explicit `null` as the
/// literal bytes `null` instead of collapsing it into `None`. Absent fields
/// fall back to the `#[serde(default)]` of `None`.
pub(crate) fn raw_present<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    jsonrpc: &'static str,
    id: &'a RawValue,
    error: ErrorObject,
}

const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"internal error"}}"#;

fn null_id() -> &'static RawValue {
    static NULL: OnceLock<Box<RawValue>> = OnceLock::new();
    NULL.get_or_init(|| RawValue::from_string("null".to_owned()).expect("literal null"))
}

/// Serialize an error response. A missing id becomes the literal `null`.
pub fn error_response(
    id: Option<&RawValue>,
    code: i32,
    message: &str,
    data: Option<serde_json::Value>,
) -> String {
    let envelope = ErrorEnvelope {
        jsonrpc: "2.0",
        id: match id {
            Some(v) => v,
            None => null_id(),
        },
        error: ErrorObject {
            code,
            message: message.to_owned(),
            data,
        },
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| FALLBACK_ERROR.to_owned())
}

/// Replace the `id` field of a serialized response with the given raw bytes.
///
/// Used on replay hits so that clients see their own id even when the stored
/// cassette entry was recorded under a different one. A `None` id returns the
/// response untouched.
pub fn with_response_id(
    response: &RawValue,
    id: Option<&RawValue>,
) -> Result<String, serde_json::Error> {
    let Some(id) = id else {
        return Ok(response.get().to_owned());
    };
    let mut fields: BTreeMap<String, Box<RawValue>> = serde_json::from_str(response.get())?;
    fields.insert("id".to_owned(), id.to_owned());
    serde_json::to_string(&fields)
}
