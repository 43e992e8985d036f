//! HTTP front-end and per-request dispatch pipeline.
//!
//! Every `/rpc` call runs the same ordered pipeline:
//!
//! ```text
//! parse → envelope validation → signature
//!    → replay lookup      hit  → rewrite id, return (204 for notifications)
//!                         miss → strict? "replay miss" error
//!    → tools/call validation gate (allow/deny + schema)
//!    → upstream POST
//!         event-stream → byte passthrough, never recorded
//!         JSON         → bounded read, best-effort record, return
//! ```
//!
//! A batch runs the pipeline per item, sequentially and in order;
//! notifications contribute no response entries anywhere. All JSON-RPC
//! errors ride on HTTP 200 — non-200 statuses are reserved for transport
//! problems (origin, method, path, body size).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request as AxumRequest, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::value::RawValue;
use tracing::warn;

use crate::jsonrpc::{
    self, error_response, Request, INVALID_PARAMS, INVALID_REQUEST, SERVER_ERROR,
};
use crate::metrics::GatewayMetrics;
use crate::record::Recorder;
use crate::replay::ReplayStore;
use crate::signature::{self, ToolCallParams};
use crate::upstream::{read_json_body, UpstreamBodyError, UpstreamClient};
use crate::validate::Validator;

const DEFAULT_MAX_BODY: usize = 1 << 20;

/// Everything the gateway needs at startup. Collaborators that are absent
/// (no upstream, no recorder, no replay store) simply disable their branch
/// of the pipeline.
#[derive(Default)]
pub struct GatewayOptions {
    pub upstream: Option<UpstreamClient>,
    pub validator: Option<Validator>,
    pub recorder: Option<Recorder>,
    pub replay: Option<ReplayStore>,
    pub replay_strict: bool,
    pub origin_allowlist: Vec<String>,
    pub forward_headers: Vec<HeaderName>,
    pub prometheus_metrics: bool,
    /// Cap on request and upstream response bodies; zero means 1 MiB.
    pub max_body: usize,
}

/// Owns the pipeline collaborators for the server's lifetime. Immutable
/// after construction apart from the atomic metrics.
pub struct Gateway {
    upstream: Option<UpstreamClient>,
    validator: Option<Validator>,
    recorder: Option<Recorder>,
    replay: Option<ReplayStore>,
    replay_strict: bool,
    origin_allowlist: HashSet<String>,
    forward_headers: Vec<HeaderName>,
    prometheus_metrics: bool,
    max_body: usize,
    metrics: GatewayMetrics,
}

impl Gateway {
    pub fn new(options: GatewayOptions) -> Self {
        let max_body = if options.max_body == 0 {
            DEFAULT_MAX_BODY
        } else {
            options.max_body
        };
        Self {
            upstream: options.upstream,
            validator: options.validator,
            recorder: options.recorder,
            replay: options.replay,
            replay_strict: options.replay_strict,
            origin_allowlist: options
                .origin_allowlist
                .into_iter()
                .map(|o| o.trim().to_owned())
                .filter(|o| !o.is_empty())
                .collect(),
            forward_headers: options.forward_headers,
            prometheus_metrics: options.prometheus_metrics,
            max_body,
            metrics: GatewayMetrics::new(),
        }
    }

    /// Build the axum router. Unknown paths 404 and wrong methods 405 via
    /// axum's defaults; `/metrics` exists only when enabled by policy.
    pub fn into_router(self) -> Router {
        let prometheus = self.prometheus_metrics;
        let state = Arc::new(self);
        let mut router = Router::new()
            .route("/rpc", post(handle_rpc))
            .route("/healthz", get(handle_healthz))
            .route("/metricsz", get(handle_metricsz));
        if prometheus {
            router = router.route("/metrics", get(handle_metrics));
        }
        router.with_state(state)
    }
}

/// How an item reached the pipeline; decides header forwarding and what an
/// upstream event-stream response means.
#[derive(Clone, Copy)]
enum ItemMode {
    Single { accepts_stream: bool },
    Batch,
}

/// Terminal state of one pipeline item.
enum ItemOutcome {
    /// JSON to emit. Single calls use the status; batch items ignore it.
    Payload { status: StatusCode, body: String },
    /// Notification: nothing may be emitted.
    Silent,
    /// Upstream chose to stream; only produced for accepting single calls.
    Stream(reqwest::Response),
}

fn json_payload(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

async fn handle_rpc(State(state): State<Arc<Gateway>>, request: AxumRequest) -> Response {
    let (parts, body) = request.into_parts();

    // Requests without an Origin header always pass; browsers are the
    // threat model here, not curl.
    if !state.origin_allowlist.is_empty() {
        if let Some(origin) = parts.headers.get(header::ORIGIN) {
            let allowed = origin
                .to_str()
                .map(|o| state.origin_allowlist.contains(o))
                .unwrap_or(false);
            if !allowed {
                return (StatusCode::FORBIDDEN, "origin not allowed\n").into_response();
            }
        }
    }

    state.metrics.inc_requests();

    let bytes = match Limited::new(body, state.max_body).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                return json_payload(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    error_response(None, INVALID_REQUEST, "request too large", None),
                );
            }
            return (StatusCode::BAD_REQUEST, "failed to read body\n").into_response();
        }
    };

    let trimmed = bytes.trim_ascii();
    if trimmed.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty body\n").into_response();
    }

    if trimmed[0] == b'[' {
        handle_batch(&state, &parts.headers, trimmed).await
    } else {
        handle_single(&state, &parts.headers, trimmed).await
    }
}

async fn handle_single(state: &Arc<Gateway>, headers: &HeaderMap, item: &[u8]) -> Response {
    let start = Instant::now();
    let mode = ItemMode::Single {
        accepts_stream: wants_event_stream(headers),
    };
    let outcome = process_item(state, headers, item, mode).await;
    state.metrics.observe_latency(start.elapsed());

    match outcome {
        ItemOutcome::Payload { status, body } => json_payload(status, body),
        ItemOutcome::Silent => StatusCode::NO_CONTENT.into_response(),
        ItemOutcome::Stream(upstream) => relay_stream(state.clone(), upstream),
    }
}

async fn handle_batch(state: &Arc<Gateway>, headers: &HeaderMap, body: &[u8]) -> Response {
    let items: Vec<&RawValue> = match std::str::from_utf8(body)
        .ok()
        .and_then(|text| serde_json::from_str(text).ok())
    {
        Some(items) => items,
        None => {
            return json_payload(
                StatusCode::OK,
                error_response(None, INVALID_REQUEST, "invalid JSON-RPC", None),
            );
        }
    };
    if items.is_empty() {
        return json_payload(
            StatusCode::OK,
            error_response(None, INVALID_REQUEST, "invalid JSON-RPC batch", None),
        );
    }
    state.metrics.add_batch_items(items.len() as u64);

    let mut responses: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let start = Instant::now();
        let outcome = process_item(state, headers, item.get().as_bytes(), ItemMode::Batch).await;
        state.metrics.observe_latency(start.elapsed());
        match outcome {
            ItemOutcome::Payload { body, .. } => responses.push(body),
            ItemOutcome::Silent => {}
            // Batch mode never negotiates streaming, so the pipeline
            // converts event-stream responses into errors before this point.
            ItemOutcome::Stream(_) => {}
        }
    }

    if responses.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    json_payload(StatusCode::OK, format!("[{}]", responses.join(",")))
}

/// Run one JSON-RPC item through the full pipeline.
async fn process_item(
    state: &Arc<Gateway>,
    headers: &HeaderMap,
    item: &[u8],
    mode: ItemMode,
) -> ItemOutcome {
    let error = |id: Option<&RawValue>, code: i32, message: &str, data: Option<serde_json::Value>| {
        ItemOutcome::Payload {
            status: StatusCode::OK,
            body: error_response(id, code, message, data),
        }
    };

    let req: Request = match serde_json::from_slice(item) {
        Ok(req) => req,
        Err(_) => return error(None, INVALID_REQUEST, "invalid JSON-RPC", None),
    };
    let notification = req.is_notification();
    let id = req.id.as_deref();

    // Past this point a notification absorbs every failure silently.
    if let Err(err) = req.validate() {
        if notification {
            return ItemOutcome::Silent;
        }
        return error(id, INVALID_REQUEST, &err.to_string(), None);
    }

    let sig = match signature::from_request(&req) {
        Ok(sig) => sig,
        Err(_) => {
            if notification {
                return ItemOutcome::Silent;
            }
            return error(id, INVALID_REQUEST, "unable to compute signature", None);
        }
    };

    if let Some(replay) = &state.replay {
        if let Some(stored) = replay.lookup(&req, &sig) {
            state.metrics.inc_replay_hit();
            if notification {
                return ItemOutcome::Silent;
            }
            return match jsonrpc::with_response_id(stored, id) {
                Ok(body) => ItemOutcome::Payload {
                    status: StatusCode::OK,
                    body,
                },
                Err(_) => error(id, SERVER_ERROR, "invalid replay response", None),
            };
        }
        state.metrics.inc_replay_miss();
        if state.replay_strict {
            if notification {
                return ItemOutcome::Silent;
            }
            return error(id, SERVER_ERROR, "replay miss", None);
        }
    }

    if req.method == "tools/call" {
        if let Some(validator) = &state.validator {
            let (tool, args) = match parse_tool_call(req.params.as_deref()) {
                Ok(parsed) => parsed,
                Err(_) => {
                    state.metrics.inc_validation_reject();
                    if notification {
                        return ItemOutcome::Silent;
                    }
                    return error(id, INVALID_PARAMS, "invalid tools/call params", None);
                }
            };
            match validator.validate_tool_call(&tool, args.as_deref()) {
                Err(err) => {
                    warn!(tool = %tool, error = %err, "tool validation failed");
                    if notification {
                        return ItemOutcome::Silent;
                    }
                    return error(id, SERVER_ERROR, "validation error", None);
                }
                Ok(decision) => {
                    if decision.allowed && !decision.violations.is_empty() {
                        warn!(
                            tool = %tool,
                            violations = ?decision.violations,
                            "validation audit"
                        );
                    }
                    if !decision.allowed {
                        state.metrics.inc_validation_reject();
                        if notification {
                            return ItemOutcome::Silent;
                        }
                        let data = serde_json::to_value(&decision.violations).ok();
                        return error(id, INVALID_PARAMS, "tool call rejected", data);
                    }
                }
            }
        }
    }

    let Some(upstream) = &state.upstream else {
        if notification {
            return ItemOutcome::Silent;
        }
        return error(id, SERVER_ERROR, "no upstream configured", None);
    };

    let include_accept = matches!(mode, ItemMode::Single { accepts_stream: true });
    let response = match upstream
        .forward(
            headers,
            Bytes::copy_from_slice(item),
            include_accept,
            &state.forward_headers,
        )
        .await
    {
        Ok(response) => response,
        Err(err) => {
            state.metrics.inc_upstream_error();
            warn!(error = %err, "upstream request failed");
            if notification {
                return ItemOutcome::Silent;
            }
            return error(id, SERVER_ERROR, "upstream error", None);
        }
    };

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if is_event_stream(content_type) {
        // Streamed responses are never recorded or replayed.
        if notification {
            return ItemOutcome::Silent;
        }
        if include_accept {
            return ItemOutcome::Stream(response);
        }
        state.metrics.inc_upstream_error();
        return error(
            id,
            SERVER_ERROR,
            "upstream streaming response requires Accept: text/event-stream",
            None,
        );
    }

    let status = response.status();
    let body = match read_json_body(response, state.max_body).await {
        Ok(body) => body,
        Err(err) => {
            state.metrics.inc_upstream_error();
            if notification {
                return ItemOutcome::Silent;
            }
            let message = match err {
                UpstreamBodyError::TooLarge => "upstream response too large",
                UpstreamBodyError::Transport(_) => "upstream error",
            };
            return error(id, SERVER_ERROR, message, None);
        }
    };

    if body.trim_ascii().is_empty() {
        state.metrics.inc_upstream_error();
        if notification {
            return ItemOutcome::Silent;
        }
        return error(id, SERVER_ERROR, "empty upstream response", None);
    }

    if let Some(recorder) = &state.recorder {
        if let Err(err) = recorder.append(&sig, item, &body) {
            warn!(error = %err, "record append failed");
        }
    }

    if notification {
        return ItemOutcome::Silent;
    }
    ItemOutcome::Payload {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Relay an upstream event stream to the client, capped at one byte past
/// the body limit so overruns are observable.
fn relay_stream(state: Arc<Gateway>, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));
    let cache_control = upstream
        .headers()
        .get(header::CACHE_CONTROL)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("no-store"));

    let budget = state.max_body as u64 + 1;
    let stream = upstream.bytes_stream().scan(budget, move |budget, chunk| {
        let item = match chunk {
            Err(err) => {
                state.metrics.inc_upstream_error();
                warn!(error = %err, "upstream stream copy failed");
                None
            }
            Ok(mut bytes) => {
                if *budget == 0 {
                    None
                } else {
                    if bytes.len() as u64 >= *budget {
                        bytes.truncate(*budget as usize);
                        *budget = 0;
                        state.metrics.inc_upstream_error();
                        warn!(
                            max_body = state.max_body,
                            "upstream stream truncated at max body"
                        );
                    } else {
                        *budget -= bytes.len() as u64;
                    }
                    Some(Ok::<Bytes, std::io::Error>(bytes))
                }
            }
        };
        std::future::ready(item)
    });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_healthz(State(state): State<Arc<Gateway>>) -> Response {
    let payload = serde_json::json!({
        "ok": true,
        "upstream_configured": state.upstream.is_some(),
        "record_enabled": state.recorder.is_some(),
        "replay_enabled": state.replay.is_some(),
    });
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        payload.to_string(),
    )
        .into_response()
}

async fn handle_metricsz(State(state): State<Arc<Gateway>>) -> Response {
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        state.metrics.snapshot().to_string(),
    )
        .into_response()
}

async fn handle_metrics(State(state): State<Arc<Gateway>>) -> Response {
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            ),
        ],
        state.metrics.render_prometheus(),
    )
        .into_response()
}

/// Decode `tools/call` params into the tool name and raw arguments.
fn parse_tool_call(
    params: Option<&RawValue>,
) -> Result<(String, Option<Box<RawValue>>), serde_json::Error> {
    let params = params.ok_or_else(|| {
        serde::de::Error::custom("missing tools/call params")
    })?;
    let parsed: ToolCallParams = serde_json::from_str(params.get())?;
    if parsed.tool.is_empty() {
        return Err(serde::de::Error::custom("missing tool name"));
    }
    Ok((parsed.tool, parsed.arguments))
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.to_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// Content-Type comparison ignoring parameters and case.
fn is_event_stream(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    essence == "text/event-stream"
}
