//! Canonical request signatures.
//!
//! A signature is the lowercase hex SHA-256 of a canonical payload derived
//! from the request. For `tools/call` the payload is `{method, tool,
//! arguments}`; for everything else it is `{method, params}`. The variable
//! parts are round-tripped through [`serde_json::Value`] before hashing,
//! which strips whitespace and fixes object-key order (lexicographic, since
//! `serde_json::Map` is a BTreeMap). Two semantically equal requests
//! therefore hash identically no matter how the client formatted them.
//!
//! The same canonicalization is used when recording and when loading a
//! cassette, so signatures computed on either side always line up.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

use crate::jsonrpc::Request;

/// The `tools/call` parameter shape this gateway understands.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    #[serde(default)]
    pub tool: String,
    #[serde(default, deserialize_with = "crate::jsonrpc::raw_present")]
    pub arguments: Option<Box<RawValue>>,
}

#[derive(Serialize)]
struct SigInput<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Box<RawValue>>,
}

/// Compute the canonical signature of a request.
///
/// # Errors
///
/// Fails when `params` is not valid JSON for the shape the method implies:
/// a `tools/call` whose params do not decode as `{tool, arguments}`, or
/// params/arguments that cannot be re-serialized.
pub fn from_request(req: &Request) -> Result<String, serde_json::Error> {
    let mut input = SigInput {
        method: &req.method,
        tool: None,
        arguments: None,
        params: None,
    };

    if req.method == "tools/call" {
        if let Some(params) = &req.params {
            let parsed: ToolCallParams = serde_json::from_str(params.get())?;
            if !parsed.tool.is_empty() {
                input.tool = Some(parsed.tool);
            }
            if let Some(args) = parsed.arguments {
                input.arguments = Some(normalize(args.get())?);
            }
        }
    } else if let Some(params) = &req.params {
        input.params = Some(normalize(params.get())?);
    }

    let payload = serde_json::to_string(&input)?;
    Ok(hex::encode(Sha256::digest(payload.as_bytes())))
}

/// Round-trip raw JSON through `Value` to get canonical bytes.
fn normalize(raw: &str) -> Result<Box<RawValue>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    RawValue::from_string(serde_json::to_string(&value)?)
}
