//! HTTP server implementation using Axum.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::interval;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::exec_log::ExecutionRecord;
use crate::execution::{ExecutionResult, Language, UnsupportedLanguage, MAX_CODE_BYTES};
use crate::sandbox;
use crate::state::AppState;

#[derive(Serialize)]
struct ExecuteReply {
    #[serde(flatten)]
    result: ExecutionResult,
    remaining: u32,
}

#[derive(Serialize)]
struct LanguageInfo {
    language: &'static str,
    version: &'static str,
    runner: &'static str,
}

/// Errors surfaced to the caller before any execution path runs. Faults
/// inside a submitted program are not errors at this level; they travel in
/// the result of a 200 response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Code is required")]
    MissingCode,
    #[error("Code exceeds 100KB limit")]
    CodeTooLarge,
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),
    #[error("Rate limit exceeded. Please wait before running more code.")]
    RateLimited { reset_in_secs: u64 },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::RateLimited { reset_in_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": self.to_string(), "resetIn": reset_in_secs }),
            ),
            _ => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
        };
        (status, Json(body)).into_response()
    }
}

/// How the caller was identified, strongest first. Anonymous callers share
/// one rate-limit bucket, which makes the anonymous path the easiest to
/// exhaust.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Caller {
    User(String),
    Address(String),
    Anonymous,
}

impl Caller {
    fn key(&self) -> &str {
        match self {
            Caller::User(id) => id,
            Caller::Address(addr) => addr,
            Caller::Anonymous => "anonymous",
        }
    }
}

fn resolve_caller(headers: &HeaderMap, peer: Option<SocketAddr>) -> Caller {
    if let Some(id) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        if !id.is_empty() {
            return Caller::User(id.to_string());
        }
    }
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Caller::Address(first.to_string());
        }
    }
    if let Some(addr) = peer {
        return Caller::Address(addr.ip().to_string());
    }
    Caller::Anonymous
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/languages", get(languages))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) -> anyhow::Result<()> {
    // Sweep expired rate-limit entries on a window-length interval.
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = interval(limiter.window());
        loop {
            interval.tick().await;
            limiter.sweep();
        }
    });

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn languages() -> Json<Vec<LanguageInfo>> {
    let list = Language::ALL
        .iter()
        .map(|&lang| match lang.remote_engine() {
            Some(engine) => LanguageInfo {
                language: lang.as_str(),
                version: engine.version,
                runner: "remote",
            },
            None => LanguageInfo {
                language: lang.as_str(),
                version: "v8",
                runner: "sandbox",
            },
        })
        .collect();
    Json(list)
}

async fn execute(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<ExecuteReply>, ApiError> {
    let caller = resolve_caller(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    // Rate check comes first; a denial is never charged.
    let decision = state.limiter.check_and_consume(caller.key());
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            reset_in_secs: decision.reset_in.as_secs_f64().ceil() as u64,
        });
    }

    // Fields are pulled from the raw value so a non-string `code` gets the
    // same error shape as a missing one.
    let code = match body.get("code").and_then(Value::as_str) {
        Some(code) if !code.is_empty() => code,
        _ => return Err(ApiError::MissingCode),
    };
    if code.len() > MAX_CODE_BYTES {
        return Err(ApiError::CodeTooLarge);
    }
    let language: Language = body
        .get("language")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse()?;

    info!(caller = caller.key(), %language, code_len = code.len(), "executing snippet");

    let result = if language.is_local() {
        sandbox::run_local(code).await
    } else {
        state.piston.execute(code, language).await
    };

    // Best-effort logging, signed-in callers only. The response is already
    // decided; a failed write never reaches the caller.
    if let Caller::User(user_id) = &caller {
        let record = ExecutionRecord {
            user_id: user_id.clone(),
            language,
            exit_code: if result.success { 0 } else { 1 },
            execution_time_ms: result.execution_time_ms,
            error_message: result.error.clone(),
        };
        let exec_log = state.exec_log.clone();
        tokio::spawn(async move {
            if let Err(e) = exec_log.record(record).await {
                warn!(error = %e, "failed to record execution");
            }
        });
    }

    Ok(Json(ExecuteReply {
        result,
        remaining: decision.remaining,
    }))
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(%details, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Failed to execute code", "details": details })),
    )
        .into_response()
}
