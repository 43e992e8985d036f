//! mcp-proxy-gateway - policy-enforcing JSON-RPC 2.0 gateway for a single
//! upstream MCP server.
//!
//! The gateway canonicalizes each incoming call into a stable signature,
//! can answer it from a recorded cassette (deterministic replay), enforces
//! a declarative per-tool policy (allow/deny plus JSON-Schema argument
//! validation), records request/response pairs to an append-only NDJSON
//! log, and otherwise forwards to the upstream — including passthrough of
//! server-sent event streams.
//!
//! # Layout
//!
//! - [`server`] - HTTP front-end and the per-request dispatch pipeline
//! - [`signature`] - canonical request digests
//! - [`replay`] / [`record`] - cassette loading and the rotating record log
//! - [`validate`] - tool allow/deny and schema enforcement
//! - [`config`] - policy file loading
//! - [`metrics`] - lock-free counters and the latency histogram

pub mod config;
pub mod jsonrpc;
pub mod metrics;
pub mod record;
pub mod redact;
pub mod replay;
pub mod server;
pub mod signature;
pub mod upstream;
pub mod validate;
