//! Recursive key-based redaction for record entries.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Sentinel written in place of redacted values.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Error)]
pub enum RedactError {
    #[error("invalid redact_key_regex {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Replaces object values whose key matches a configured name or pattern
/// with [`REDACTED`], preserving the surrounding structure. Arrays and
/// scalars are traversed but never replaced themselves.
#[derive(Debug)]
pub struct Redactor {
    keys: HashSet<String>,
    key_patterns: Vec<Regex>,
}

impl Redactor {
    /// Build a redactor from the policy's key list and regex list.
    ///
    /// Returns `None` when no usable rule remains, so callers can skip the
    /// parse/emit round-trip entirely.
    pub fn new(redact_keys: &[String], redact_key_regex: &[String]) -> Result<Option<Self>, RedactError> {
        let keys: HashSet<String> = redact_keys
            .iter()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect();
        let mut key_patterns = Vec::new();
        for pattern in redact_key_regex {
            if pattern.is_empty() {
                continue;
            }
            let re = Regex::new(pattern).map_err(|source| RedactError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            key_patterns.push(re);
        }
        if keys.is_empty() && key_patterns.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { keys, key_patterns }))
    }

    /// Redact a raw JSON document and re-emit it compactly.
    pub fn apply(&self, raw: &[u8]) -> Result<String, serde_json::Error> {
        let mut value: Value = serde_json::from_slice(raw)?;
        self.redact_value(&mut value);
        serde_json::to_string(&value)
    }

    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if self.matches_key(key) {
                        *child = Value::String(REDACTED.to_owned());
                    } else {
                        self.redact_value(child);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.redact_value(item);
                }
            }
            _ => {}
        }
    }

    fn matches_key(&self, key: &str) -> bool {
        self.keys.contains(key) || self.key_patterns.iter().any(|re| re.is_match(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor(keys: &[&str], patterns: &[&str]) -> Redactor {
        let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        Redactor::new(&keys, &patterns)
            .expect("rules should compile")
            .expect("rules should be non-empty")
    }

    #[test]
    fn redacts_keys_at_any_depth() {
        let r = redactor(&["api_key"], &[]);
        let out = r
            .apply(br#"{"api_key":"secret","nested":{"api_key":"deep"},"list":[{"api_key":"in-array"}]}"#)
            .expect("should redact");
        let value: Value = serde_json::from_str(&out).expect("should parse");
        assert_eq!(value["api_key"], REDACTED);
        assert_eq!(value["nested"]["api_key"], REDACTED);
        assert_eq!(value["list"][0]["api_key"], REDACTED);
        assert!(!out.contains("secret"));
        assert!(!out.contains("deep"));
        assert!(!out.contains("in-array"));
    }

    #[test]
    fn redacts_whole_subtree_under_matching_key() {
        let r = redactor(&["credentials"], &[]);
        let out = r
            .apply(br#"{"credentials":{"user":"u","password":"p"},"other":1}"#)
            .expect("should redact");
        let value: Value = serde_json::from_str(&out).expect("should parse");
        assert_eq!(value["credentials"], REDACTED);
        assert_eq!(value["other"], 1);
    }

    #[test]
    fn redacts_by_regex() {
        let r = redactor(&[], &["(?i)token"]);
        let out = r
            .apply(br#"{"accessToken":"a","refresh_token":"b","plain":"keep"}"#)
            .expect("should redact");
        let value: Value = serde_json::from_str(&out).expect("should parse");
        assert_eq!(value["accessToken"], REDACTED);
        assert_eq!(value["refresh_token"], REDACTED);
        assert_eq!(value["plain"], "keep");
    }

    #[test]
    fn scalars_and_arrays_pass_through() {
        let r = redactor(&["secret"], &[]);
        assert_eq!(r.apply(br#"[1,"two",null]"#).expect("ok"), r#"[1,"two",null]"#);
        assert_eq!(r.apply(br#""just a string""#).expect("ok"), r#""just a string""#);
    }

    #[test]
    fn empty_rules_yield_no_redactor() {
        assert!(Redactor::new(&[], &[]).expect("ok").is_none());
        assert!(
            Redactor::new(&[String::new()], &[String::new()])
                .expect("ok")
                .is_none()
        );
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let result = Redactor::new(&[], &["[".to_string()]);
        assert!(matches!(result, Err(RedactError::InvalidPattern { .. })));
    }
}
