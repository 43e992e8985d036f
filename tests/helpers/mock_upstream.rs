//! Mock MCP upstream server for integration testing.
//!
//! A small axum app bound to an ephemeral port that answers `POST /` with a
//! configurable behavior and captures what the gateway actually sent it:
//! request count, last body, last headers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// What the mock answers with.
#[derive(Clone)]
pub enum MockBehavior {
    /// `{"jsonrpc":"2.0","id":<request id>,"result":<value>}`
    EchoResult(Value),
    /// A fixed body with the given status and content type.
    FixedBody {
        status: StatusCode,
        content_type: &'static str,
        body: String,
    },
    /// An event-stream body.
    EventStream(String),
}

struct MockState {
    behavior: MockBehavior,
    request_count: RwLock<u32>,
    last_request: RwLock<Option<Value>>,
    last_headers: RwLock<Option<HeaderMap>>,
}

pub struct MockUpstream {
    behavior: MockBehavior,
}

impl MockUpstream {
    /// Echo the request id back with `{"ok":true}`.
    pub fn echo() -> Self {
        Self {
            behavior: MockBehavior::EchoResult(json!({"ok": true})),
        }
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self { behavior }
    }

    /// Bind to an ephemeral port and serve until dropped.
    pub async fn start(self) -> MockHandle {
        let state = Arc::new(MockState {
            behavior: self.behavior,
            request_count: RwLock::new(0),
            last_request: RwLock::new(None),
            last_headers: RwLock::new(None),
        });

        let app = Router::new()
            .route("/", post(handle))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock");
        });

        MockHandle {
            addr,
            state,
            _task: task,
        }
    }
}

pub struct MockHandle {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    _task: JoinHandle<()>,
}

impl MockHandle {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub async fn request_count(&self) -> u32 {
        *self.state.request_count.read().await
    }

    pub async fn last_request(&self) -> Option<Value> {
        self.state.last_request.read().await.clone()
    }

    pub async fn last_headers(&self) -> Option<HeaderMap> {
        self.state.last_headers.read().await.clone()
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    {
        let mut count = state.request_count.write().await;
        *count += 1;
    }
    {
        let mut last = state.last_request.write().await;
        *last = serde_json::from_slice(&body).ok();
    }
    {
        let mut last = state.last_headers.write().await;
        *last = Some(headers);
    }

    match &state.behavior {
        MockBehavior::EchoResult(result) => {
            let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            let id = request.get("id").cloned().unwrap_or(Value::Null);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
            )
                .into_response()
        }
        MockBehavior::FixedBody {
            status,
            content_type,
            body,
        } => (
            *status,
            [(header::CONTENT_TYPE, *content_type)],
            body.clone(),
        )
            .into_response(),
        MockBehavior::EventStream(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body.clone(),
        )
            .into_response(),
    }
}
