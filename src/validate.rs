//! Tool-call validation: allow/deny lists plus per-tool JSON Schemas.
//!
//! The decision order matters because it shapes the violation list a
//! rejected caller sees: deny hits first, then allowlist membership, then
//! the default-deny fallback, then schema violations. In `audit` mode a
//! violating call is still allowed and the violations travel with the
//! decision so the pipeline can log them; `enforce` rejects. Schema
//! *evaluation* failures are errors, not violations — they surface as a
//! server error rather than masquerading as a policy decision.

use std::collections::{HashMap, HashSet};

use serde_json::value::RawValue;
use thiserror::Error;

use crate::config::{Policy, PolicyMode};

/// Outcome of validating one tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub violations: Vec<String>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("schema for {tool}: {message}")]
    InvalidSchema { tool: String, message: String },
    #[error("invalid tool arguments: {0}")]
    Arguments(#[from] serde_json::Error),
}

/// Immutable after startup; shared across request tasks without locking.
pub struct Validator {
    mode: PolicyMode,
    default_deny: bool,
    allow: HashSet<String>,
    deny: HashSet<String>,
    schemas: HashMap<String, jsonschema::Validator>,
}

impl Validator {
    /// Compile a validator from the loaded policy. `None` yields a
    /// validator in `off` mode that allows everything.
    pub fn new(policy: Option<&Policy>) -> Result<Self, ValidateError> {
        let Some(policy) = policy else {
            return Ok(Self {
                mode: PolicyMode::Off,
                default_deny: false,
                allow: HashSet::new(),
                deny: HashSet::new(),
                schemas: HashMap::new(),
            });
        };

        let mut schemas = HashMap::new();
        for (name, entry) in &policy.tools {
            let Some(schema) = &entry.schema else {
                continue;
            };
            let compiled = jsonschema::options().build(schema).map_err(|err| {
                ValidateError::InvalidSchema {
                    tool: name.clone(),
                    message: err.to_string(),
                }
            })?;
            schemas.insert(name.clone(), compiled);
        }

        Ok(Self {
            mode: policy.mode(),
            default_deny: policy.default_deny,
            allow: policy.allow_tools.iter().cloned().collect(),
            deny: policy.deny_tools.iter().cloned().collect(),
            schemas,
        })
    }

    pub fn validate_tool_call(
        &self,
        tool: &str,
        args: Option<&RawValue>,
    ) -> Result<Decision, ValidateError> {
        if self.mode == PolicyMode::Off {
            return Ok(Decision::allow());
        }

        let mut violations = Vec::new();

        if self.deny.contains(tool) {
            violations.push("tool is denied".to_owned());
        }

        if !self.allow.is_empty() {
            if !self.allow.contains(tool) {
                violations.push("tool not in allowlist".to_owned());
            }
        } else if self.default_deny && !self.schemas.contains_key(tool) {
            violations.push("tool not explicitly allowed".to_owned());
        }

        if let Some(schema) = self.schemas.get(tool) {
            match args {
                None => violations.push("arguments are required".to_owned()),
                Some(raw) => {
                    let instance: serde_json::Value = serde_json::from_str(raw.get())?;
                    violations.extend(schema.iter_errors(&instance).map(|err| err.to_string()));
                }
            }
        }

        if violations.is_empty() {
            return Ok(Decision::allow());
        }
        Ok(Decision {
            allowed: self.mode == PolicyMode::Audit,
            violations,
        })
    }
}
