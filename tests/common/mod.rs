#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use rag_harness::embedding::{Embedder, EmbedderDescriptor};
use rag_harness::models::Vector;
use rag_harness::Result;

pub const DIMS: usize = 256;
pub const API_KEY: &str = "test-key";

pub const HERBAL_TEXT: &str = "The Voynich manuscript is an illustrated codex written in an unknown script.\n\
Its botanical section shows many plants that nobody has identified.\n\
Aetherfloris Ventus is a luminous flower that drifts on mountain winds.\n\
A single drop of its nectar lets the drinker hear distant storms.\n\
Noctis Umbraherba grows only in deep shadow and blooms at night.\n\
Its dark leaves were ground into ink by careful scribes.\n";

/// Bag-of-words embedding: lowercase alphanumeric tokens hashed into
/// `dims` buckets with FNV-1a.
pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in token.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % dims as u64) as usize] += 1.0;
    }
    v
}

/// In-process embedder using [`hash_embedding`].
pub struct HashEmbedder {
    descriptor: EmbedderDescriptor,
}

impl HashEmbedder {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            descriptor: EmbedderDescriptor::new(model, dims),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts
            .iter()
            .map(|t| hash_embedding(t, self.descriptor.dims))
            .collect())
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(&format!("Bearer {}", API_KEY)[..])
}

/// OpenAI-style `/embeddings`: hash embeddings, returned in reverse order
/// with their `index` set.
async fn embeddings(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    let inputs: Vec<String> = body["input"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let mut data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| json!({ "object": "embedding", "index": i, "embedding": hash_embedding(text, DIMS) }))
        .collect();
    data.reverse();
    Json(json!({ "object": "list", "data": data })).into_response()
}

/// OpenAI-style `/chat/completions`: answers `echo: <last message>`,
/// streamed word by word when `stream` is set.
async fn chat_completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or("")
        .to_string();
    let answer = format!("echo: {}", last);

    if body["stream"].as_bool() == Some(true) {
        let mut sse = String::new();
        sse.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "role": "assistant", "content": "" } }] })
        ));
        for (i, word) in answer.split(' ').enumerate() {
            let piece = if i == 0 { word.to_string() } else { format!(" {}", word) };
            sse.push_str(&format!(
                "data: {}\n\n",
                json!({ "choices": [{ "index": 0, "delta": { "content": piece } }] })
            ));
        }
        sse.push_str("data: [DONE]\n\n");
        sse.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "content": "after done" } }] })
        ));
        return ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response();
    }

    Json(json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": answer } }]
    }))
    .into_response()
}

async fn too_many_requests() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, "rate limit reached").into_response()
}

async fn server_error() -> Response {
    (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
}

fn sse(events: &[Value], done: bool) -> Response {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {}\n\n", event));
    }
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

fn content_chunk(text: &str) -> Value {
    json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
}

/// One fragment, then an in-band error object and no `[DONE]`.
async fn stream_then_error() -> Response {
    sse(
        &[
            content_chunk("Partial"),
            json!({ "error": { "message": "The server had an error", "type": "server_error" } }),
        ],
        false,
    )
}

/// One fragment, then the body ends without `[DONE]`.
async fn stream_truncated() -> Response {
    sse(&[content_chunk("Partial")], false)
}

/// Completion whose message content is `null`.
async fn null_content() -> Response {
    Json(json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": null } }]
    }))
    .into_response()
}

/// Mock OpenAI-compatible API.
///
/// - `/v1/...` behaves normally
/// - `/throttled/...` always answers 429
/// - `/broken/...` always answers 502
/// - `/failing/chat/completions` streams a fragment then an error payload
/// - `/truncated/chat/completions` streams a fragment then closes
/// - `/empty/chat/completions` completes with `null` content
pub fn mock_api() -> Router {
    Router::new()
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/throttled/embeddings", post(too_many_requests))
        .route("/throttled/chat/completions", post(too_many_requests))
        .route("/broken/embeddings", post(server_error))
        .route("/broken/chat/completions", post(server_error))
        .route("/failing/chat/completions", post(stream_then_error))
        .route("/truncated/chat/completions", post(stream_truncated))
        .route("/empty/chat/completions", post(null_content))
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
