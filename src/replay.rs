//! In-memory replay store loaded from a recorded cassette.
//!
//! Loading builds three indices over the NDJSON entries; lookups consult
//! exactly one of them, fixed by the match mode chosen at load time. There
//! is deliberately no fallback from one index to another: a cassette that
//! answered by signature one day and by method the next would be useless
//! for deterministic replay. Strict-miss handling lives in the dispatch
//! pipeline, not here.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::value::RawValue;
use thiserror::Error;

use crate::jsonrpc::Request;
use crate::record::Entry;
use crate::signature::ToolCallParams;

/// Which index answers lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMatch {
    #[default]
    Signature,
    Method,
    Tool,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("replay line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
}

/// Immutable after load; shared freely across request tasks.
#[derive(Debug)]
pub struct ReplayStore {
    match_mode: ReplayMatch,
    by_signature: HashMap<String, Box<RawValue>>,
    by_method: HashMap<String, Box<RawValue>>,
    by_tool: HashMap<String, Box<RawValue>>,
}

impl ReplayStore {
    /// Load a cassette. Blank lines are tolerated and entries without a
    /// signature or response are skipped; a line that is not valid JSON is
    /// a hard error. Lines are read unbounded, so multi-megabyte entries
    /// (large tool outputs) load fine.
    pub fn load(path: &Path, match_mode: ReplayMatch) -> Result<Self, ReplayError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut store = Self {
            match_mode,
            by_signature: HashMap::new(),
            by_method: HashMap::new(),
            by_tool: HashMap::new(),
        };

        let mut line = String::new();
        let mut lineno = 0usize;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            lineno += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: Entry = serde_json::from_str(trimmed)
                .map_err(|source| ReplayError::Malformed { line: lineno, source })?;
            store.index(entry);
        }
        Ok(store)
    }

    /// First entry per key wins; later duplicates are ignored.
    fn index(&mut self, entry: Entry) {
        let Some(response) = entry.response else {
            return;
        };
        if entry.signature.is_empty() {
            return;
        }
        self.by_signature
            .entry(entry.signature)
            .or_insert_with(|| response.clone());

        // The method/tool indices need the recorded request; a missing or
        // unparseable one only skips those indices.
        let Some(request) = entry.request else {
            return;
        };
        let Ok(recorded) = serde_json::from_str::<Request>(request.get()) else {
            return;
        };
        if recorded.method.is_empty() {
            return;
        }
        self.by_method
            .entry(recorded.method.clone())
            .or_insert_with(|| response.clone());

        if recorded.method == "tools/call" {
            if let Some(tool) = extract_tool_name(recorded.params.as_deref()) {
                self.by_tool.entry(tool).or_insert(response);
            }
        }
    }

    /// Look up a stored response for the live request. Selection depends
    /// only on the store's match mode.
    pub fn lookup(&self, req: &Request, signature: &str) -> Option<&RawValue> {
        match self.match_mode {
            ReplayMatch::Signature => {
                if signature.is_empty() {
                    return None;
                }
                self.by_signature.get(signature).map(AsRef::as_ref)
            }
            ReplayMatch::Method => {
                if req.method.is_empty() {
                    return None;
                }
                self.by_method.get(&req.method).map(AsRef::as_ref)
            }
            ReplayMatch::Tool => {
                if req.method != "tools/call" {
                    return None;
                }
                let tool = extract_tool_name(req.params.as_deref())?;
                self.by_tool.get(&tool).map(AsRef::as_ref)
            }
        }
    }
}

fn extract_tool_name(params: Option<&RawValue>) -> Option<String> {
    let params = params?;
    let parsed: ToolCallParams = serde_json::from_str(params.get()).ok()?;
    if parsed.tool.is_empty() {
        return None;
    }
    Some(parsed.tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cassette(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file.flush().expect("flush");
        file
    }

    fn request(json: &str) -> Request {
        serde_json::from_str(json).expect("should parse")
    }

    #[test]
    fn lookup_by_signature() {
        let req_json = r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{"q":"same"}}"#;
        let req = request(req_json);
        let sig = signature::from_request(&req).expect("signature");

        let file = cassette(&[&format!(
            r#"{{"time":"2024-01-01T00:00:00Z","signature":"{sig}","request":{req_json},"response":{{"jsonrpc":"2.0","id":1,"result":{{"ok":true}}}}}}"#
        )]);
        let store = ReplayStore::load(file.path(), ReplayMatch::Signature).expect("load");

        let hit = store.lookup(&req, &sig).expect("should hit");
        assert!(hit.get().contains(r#""ok":true"#));

        let other = request(r#"{"jsonrpc":"2.0","id":1,"method":"pong"}"#);
        let other_sig = signature::from_request(&other).expect("signature");
        assert!(store.lookup(&other, &other_sig).is_none());
    }

    #[test]
    fn lookup_by_method() {
        let file = cassette(&[
            r#"{"time":"t","signature":"s1","request":{"jsonrpc":"2.0","id":1,"method":"ping"},"response":{"jsonrpc":"2.0","id":1,"result":1}}"#,
        ]);
        let store = ReplayStore::load(file.path(), ReplayMatch::Method).expect("load");

        // Different params, same method: still a hit in method mode.
        let req = request(r#"{"jsonrpc":"2.0","id":9,"method":"ping","params":{"x":1}}"#);
        assert!(store.lookup(&req, "unrelated-signature").is_some());

        let miss = request(r#"{"jsonrpc":"2.0","id":9,"method":"pong"}"#);
        assert!(store.lookup(&miss, "unrelated-signature").is_none());
    }

    #[test]
    fn lookup_by_tool() {
        let file = cassette(&[
            r#"{"time":"t","signature":"s1","request":{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"tool":"web.search","arguments":{"q":"a"}}},"response":{"jsonrpc":"2.0","id":1,"result":"hit"}}"#,
        ]);
        let store = ReplayStore::load(file.path(), ReplayMatch::Tool).expect("load");

        let req = request(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"tool":"web.search","arguments":{"q":"different"}}}"#,
        );
        assert!(store.lookup(&req, "x").is_some());

        // Tool mode never answers non-tools/call requests.
        let plain = request(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#);
        assert!(store.lookup(&plain, "x").is_none());

        let other_tool = request(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"tool":"fs.read"}}"#,
        );
        assert!(store.lookup(&other_tool, "x").is_none());
    }

    #[test]
    fn first_entry_per_key_wins() {
        let file = cassette(&[
            r#"{"time":"t","signature":"dup","request":{"jsonrpc":"2.0","id":1,"method":"ping"},"response":{"jsonrpc":"2.0","id":1,"result":"first"}}"#,
            r#"{"time":"t","signature":"dup","request":{"jsonrpc":"2.0","id":1,"method":"ping"},"response":{"jsonrpc":"2.0","id":1,"result":"second"}}"#,
        ]);
        let store = ReplayStore::load(file.path(), ReplayMatch::Signature).expect("load");

        let req = request(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        let hit = store.lookup(&req, "dup").expect("should hit");
        assert!(hit.get().contains("first"));
    }

    #[test]
    fn blank_lines_and_partial_entries_are_skipped() {
        let file = cassette(&[
            "",
            r#"{"time":"t","signature":"","request":{"jsonrpc":"2.0","id":1,"method":"ping"},"response":{"jsonrpc":"2.0","id":1,"result":1}}"#,
            r#"{"time":"t","signature":"no-response","request":{"jsonrpc":"2.0","id":1,"method":"ping"}}"#,
            "   ",
            r#"{"time":"t","signature":"good","response":{"jsonrpc":"2.0","id":1,"result":1}}"#,
        ]);
        let store = ReplayStore::load(file.path(), ReplayMatch::Signature).expect("load");

        let req = request(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert!(store.lookup(&req, "good").is_some());
        assert!(store.lookup(&req, "no-response").is_none());
        // Entry without a request still indexes by signature only.
        assert!(store.lookup(&req, "").is_none());
    }

    #[test]
    fn malformed_line_fails_the_load() {
        let file = cassette(&[r#"{"time":"t","#]);
        let result = ReplayStore::load(file.path(), ReplayMatch::Signature);
        assert!(matches!(result, Err(ReplayError::Malformed { line: 1, .. })));
    }

    #[test]
    fn very_long_lines_load() {
        let big = "x".repeat(17 * 1024 * 1024);
        let line = format!(
            r#"{{"time":"t","signature":"big","request":{{"jsonrpc":"2.0","id":1,"method":"ping"}},"response":{{"jsonrpc":"2.0","id":1,"result":"{big}"}}}}"#
        );
        let file = cassette(&[&line]);
        let store = ReplayStore::load(file.path(), ReplayMatch::Signature).expect("load");

        let req = request(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert!(store.lookup(&req, "big").is_some());
    }
}
