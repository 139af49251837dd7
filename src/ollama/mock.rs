//! Scriptable stand-in for the Ollama HTTP API, served by axum on an
//! ephemeral port. Counts chat requests and records their bodies.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Responder = dyn Fn(usize, &Value) -> MockReply + Send + Sync;

pub enum MockReply {
    Json(Value),
    Text(String),
    Status(u16, String),
    Ndjson(Vec<String>),
    /// NDJSON lines on a body that never closes.
    NdjsonOpen(Vec<String>),
}

impl MockReply {
    /// A well-formed non-streaming chat reply carrying `content`.
    pub fn content(content: &str) -> Self {
        Self::Json(json!({
            "model": "qwen2.5-coder:3b",
            "message": {"role": "assistant", "content": content},
            "done": true
        }))
    }

    pub fn json(value: Value) -> Self {
        Self::Json(value)
    }

    pub fn text(body: &str) -> Self {
        Self::Text(body.to_string())
    }

    pub fn status(code: u16) -> Self {
        Self::Status(code, String::new())
    }

    pub fn status_with_body(code: u16, body: &str) -> Self {
        Self::Status(code, body.to_string())
    }

    pub fn ndjson(lines: &[&str]) -> Self {
        Self::Ndjson(lines.iter().map(|l| l.to_string()).collect())
    }

    pub fn ndjson_open(lines: &[&str]) -> Self {
        Self::NdjsonOpen(lines.iter().map(|l| l.to_string()).collect())
    }
}

impl IntoResponse for MockReply {
    fn into_response(self) -> Response {
        match self {
            Self::Json(v) => (StatusCode::OK, Json(v)).into_response(),
            Self::Text(body) => (StatusCode::OK, body).into_response(),
            Self::Status(code, body) => {
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, body).into_response()
            }
            Self::Ndjson(lines) => {
                let mut body = lines.join("\n");
                body.push('\n');
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/x-ndjson")],
                    body,
                )
                    .into_response()
            }
            Self::NdjsonOpen(lines) => {
                let chunks = lines
                    .into_iter()
                    .map(|l| Ok::<_, std::io::Error>(format!("{l}\n")));
                let body = futures::stream::iter(chunks).chain(futures::stream::pending());
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/x-ndjson")],
                    Body::from_stream(body),
                )
                    .into_response()
            }
        }
    }
}

struct MockState {
    chat_requests: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
    responder: Box<Responder>,
}

#[derive(Clone)]
pub struct MockChat {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockChat {
    /// Serve on the current runtime. `responder` gets the 0-based index of
    /// the chat request.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(usize) -> MockReply + Send + Sync + 'static,
    {
        Self::start_with(move |n, _| responder(n)).await
    }

    /// Like [`start`](Self::start) but the responder also sees the request body.
    pub async fn start_with<F>(responder: F) -> Self
    where
        F: Fn(usize, &Value) -> MockReply + Send + Sync + 'static,
    {
        let state = Arc::new(MockState {
            chat_requests: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        });

        let app = Router::new()
            .route("/api/chat", post(chat))
            .route("/api/tags", get(tags))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Serve from a dedicated runtime thread, for tests of blocking code.
    pub fn start_in_background<F>(responder: F) -> Self
    where
        F: Fn(usize) -> MockReply + Send + Sync + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let mock = MockChat::start(responder).await;
                tx.send(mock).unwrap();
                std::future::pending::<()>().await;
            });
        });
        rx.recv().unwrap()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> usize {
        self.state.chat_requests.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.bodies.lock().last().cloned()
    }
}

async fn chat(State(state): State<Arc<MockState>>, body: String) -> Response {
    let n = state.chat_requests.fetch_add(1, Ordering::SeqCst);
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let reply = (state.responder)(n, &body);
    state.bodies.lock().push(body);
    reply.into_response()
}

async fn tags() -> Json<Value> {
    Json(json!({
        "models": [
            {"name": "qwen2.5-coder:3b", "size": 1929912432u64, "digest": "e7149271c296"}
        ]
    }))
}
