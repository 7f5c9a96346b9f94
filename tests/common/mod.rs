//! Test helpers: throwaway stub upstreams and response plumbing.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use serde_json::Value;

/// Serve a router on an ephemeral local port and return its address.
pub async fn spawn_stub_upstream(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Piston-shaped stub that echoes the engine, version and entry filename it
/// received back through stdout, exiting 0.
pub fn echo_stub() -> Router {
    Router::new().route(
        "/execute",
        post(|Json(req): Json<Value>| async move {
            let stdout = format!(
                "{} {} {}",
                req["language"].as_str().unwrap_or(""),
                req["version"].as_str().unwrap_or(""),
                req["files"][0]["name"].as_str().unwrap_or(""),
            );
            Json(serde_json::json!({
                "run": { "stdout": stdout, "stderr": "", "code": 0, "output": stdout }
            }))
        }),
    )
}

/// Stub that answers every execution with a fixed body.
pub fn canned_stub(response: Value) -> Router {
    Router::new().route(
        "/execute",
        post(move |Json(_req): Json<Value>| {
            let response = response.clone();
            async move { Json(response) }
        }),
    )
}

/// Stub that answers every execution with a bare status code.
pub fn status_stub(status: StatusCode) -> Router {
    Router::new().route(
        "/execute",
        post(move |Json(_req): Json<Value>| async move { status }),
    )
}

/// Collect a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
