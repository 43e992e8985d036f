//! Policy file loading and validation.
//!
//! The policy is a declarative document, YAML or JSON chosen by file
//! extension, that configures the validator, recorder redaction and
//! rotation, replay matching, and the HTTP front-end. Everything is
//! validated at startup; a bad mode, match, rotation size, or header name
//! fails the process before it ever binds a socket.

use std::collections::BTreeMap;
use std::path::Path;

use http::header::HeaderName;
use serde::Deserialize;
use thiserror::Error;

use crate::replay::ReplayMatch;

/// Validation modes for tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyMode {
    #[default]
    Enforce,
    Audit,
    Off,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub version: u32,
    pub mode: String,
    pub default_deny: bool,
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
    pub tools: BTreeMap<String, ToolEntry>,
    pub record: RecordPolicy,
    pub replay: ReplayPolicy,
    pub http: HttpPolicy,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ToolEntry {
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RecordPolicy {
    pub redact_keys: Vec<String>,
    pub redact_key_regex: Vec<String>,
    /// Rotate the active record file when the next append would exceed
    /// this size.
    pub max_bytes: Option<i64>,
    /// Number of rotated backups to retain (`path.1` .. `path.N`).
    pub max_files: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayPolicy {
    #[serde(rename = "match")]
    pub match_mode: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct HttpPolicy {
    /// Origins allowed on `POST /rpc`. When non-empty, a request carrying
    /// an Origin header not in this list is rejected; requests without an
    /// Origin header always pass.
    pub origin_allowlist: Vec<String>,
    /// Extra headers copied through to the upstream request. Kept
    /// deliberately narrow so the gateway does not become a generic HTTP
    /// proxy; Authorization is always forwarded and Accept only for SSE.
    pub forward_headers: Vec<String>,
    /// Enable the Prometheus text endpoint at `GET /metrics`. Off by
    /// default; `/metricsz` serves JSON regardless.
    pub prometheus_metrics: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse policy YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse policy JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mode must be enforce, audit, or off (got {0:?})")]
    InvalidMode(String),
    #[error("replay.match must be signature, method, or tool (got {0:?})")]
    InvalidReplayMatch(String),
    #[error("record.{field} must be >= 0 (got {value})")]
    InvalidRotation { field: &'static str, value: i64 },
    #[error("http.forward_headers contains an invalid header name: {0:?}")]
    InvalidForwardHeader(String),
}

impl Policy {
    pub fn mode(&self) -> PolicyMode {
        match self.mode.as_str() {
            "audit" => PolicyMode::Audit,
            "off" => PolicyMode::Off,
            _ => PolicyMode::Enforce,
        }
    }

    pub fn replay_match(&self) -> ReplayMatch {
        match self.replay.match_mode.as_str() {
            "method" => ReplayMatch::Method,
            "tool" => ReplayMatch::Tool,
            _ => ReplayMatch::Signature,
        }
    }

    /// Parsed forward-header names. Only meaningful after validation.
    pub fn forward_header_names(&self) -> Vec<HeaderName> {
        self.http
            .forward_headers
            .iter()
            .filter_map(|name| HeaderName::try_from(name.trim()).ok())
            .collect()
    }
}

/// Load and validate a policy file; the format follows the extension
/// (`.json` is JSON, anything else is treated as YAML).
pub fn load_policy(path: &Path) -> Result<Policy, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    let mut policy: Policy = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&data)?,
        _ => serde_yaml::from_str(&data)?,
    };

    if policy.version == 0 {
        policy.version = 1;
    }
    if policy.mode.is_empty() {
        policy.mode = "enforce".to_owned();
    }
    policy.mode = policy.mode.to_lowercase();
    if !matches!(policy.mode.as_str(), "enforce" | "audit" | "off") {
        return Err(ConfigError::InvalidMode(policy.mode));
    }

    if policy.replay.match_mode.is_empty() {
        policy.replay.match_mode = "signature".to_owned();
    }
    policy.replay.match_mode = policy.replay.match_mode.to_lowercase();
    if !matches!(
        policy.replay.match_mode.as_str(),
        "signature" | "method" | "tool"
    ) {
        return Err(ConfigError::InvalidReplayMatch(policy.replay.match_mode));
    }

    if let Some(bytes) = policy.record.max_bytes {
        if bytes < 0 {
            return Err(ConfigError::InvalidRotation {
                field: "max_bytes",
                value: bytes,
            });
        }
    }
    if let Some(files) = policy.record.max_files {
        if files < 0 {
            return Err(ConfigError::InvalidRotation {
                field: "max_files",
                value: files,
            });
        }
    }

    // Reject typos early instead of silently never forwarding the header.
    for name in &policy.http.forward_headers {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        if HeaderName::try_from(trimmed).is_err() {
            return Err(ConfigError::InvalidForwardHeader(name.clone()));
        }
    }

    Ok(policy)
}
