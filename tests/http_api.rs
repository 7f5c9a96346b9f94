//! End-to-end tests for the execution endpoint through the full router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use syntactic_playground::exec_log::NoopExecutionLog;
use syntactic_playground::http_server::router;
use syntactic_playground::piston::PistonClient;
use syntactic_playground::rate_limit::RateLimiter;
use syntactic_playground::state::AppState;

use common::{body_json, canned_stub, spawn_stub_upstream};

async fn test_state(max_requests: u32, piston_url: &str) -> AppState {
    AppState::new(
        RateLimiter::new(Duration::from_secs(60), max_requests),
        PistonClient::new(piston_url).unwrap(),
        Arc::new(NoopExecutionLog),
    )
}

/// State with a stub upstream that is never reached by the test.
async fn local_only_state() -> AppState {
    test_state(10, "http://127.0.0.1:1").await
}

fn execute_request(user: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/execute")
        .header("content-type", "application/json")
        .header("x-user-id", user)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_answers_ok() {
    let app = router(local_only_state().await);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn languages_lists_all_five_with_runners() {
    let app = router(local_only_state().await);
    let response = app
        .oneshot(Request::builder().uri("/languages").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 5);
    let js = list.iter().find(|l| l["language"] == "javascript").unwrap();
    assert_eq!(js["runner"], "sandbox");
    let py = list.iter().find(|l| l["language"] == "python").unwrap();
    assert_eq!(py["runner"], "remote");
    assert_eq!(py["version"], "3.10.0");
}

#[tokio::test]
async fn missing_code_is_rejected() {
    let app = router(local_only_state().await);
    let response = app
        .oneshot(execute_request("u1", json!({ "language": "javascript" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Code is required");
}

#[tokio::test]
async fn non_string_code_gets_the_same_error_shape() {
    let app = router(local_only_state().await);
    let response = app
        .oneshot(execute_request("u1", json!({ "code": 123, "language": "javascript" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Code is required");
}

#[tokio::test]
async fn oversized_code_is_rejected_before_execution() {
    // One byte past the 100 KiB ceiling; pointed at an unreachable upstream,
    // so reaching any executor would fail differently than a clean 400.
    let code = "a".repeat(100 * 1024 + 1);
    let app = router(local_only_state().await);
    let response = app
        .oneshot(execute_request("u1", json!({ "code": code, "language": "python" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Code exceeds 100KB limit");
}

#[tokio::test]
async fn unsupported_language_is_rejected_before_execution() {
    let app = router(local_only_state().await);
    let response = app
        .oneshot(execute_request("u1", json!({ "code": "puts 1", "language": "ruby" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("unsupported language"));
}

#[tokio::test]
async fn local_javascript_runs_end_to_end() {
    let app = router(local_only_state().await);
    let response = app
        .oneshot(execute_request(
            "u1",
            json!({ "code": "console.log('from the sandbox');", "language": "javascript" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["output"], "from the sandbox");
    assert_eq!(body["remaining"], 9);
    assert!(body["executionTime"].is_u64());
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn sandbox_fault_is_still_a_successful_request() {
    // The program fails; the service call does not.
    let app = router(local_only_state().await);
    let response = app
        .oneshot(execute_request(
            "u1",
            json!({ "code": "console.log('partial'); throw new Error('oops');", "language": "javascript" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["output"], "partial");
    assert!(body["error"].as_str().unwrap().contains("oops"));
}

#[tokio::test]
async fn remote_language_runs_through_the_proxy() {
    let upstream = spawn_stub_upstream(canned_stub(json!({
        "run": { "stdout": "42\n", "stderr": "", "code": 0, "output": "42\n" }
    })))
    .await;
    let app = router(test_state(10, &format!("http://{upstream}")).await);

    let response = app
        .oneshot(execute_request("u1", json!({ "code": "print(42)", "language": "python" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["output"], "42\n");
}

#[tokio::test]
async fn quota_exhaustion_returns_429_with_reset_hint() {
    let app = router(test_state(2, "http://127.0.0.1:1").await);
    let snippet = json!({ "code": "console.log(1);", "language": "javascript" });

    let first = app.clone().oneshot(execute_request("u1", snippet.clone())).await.unwrap();
    assert_eq!(body_json(first).await["remaining"], 1);

    let second = app.clone().oneshot(execute_request("u1", snippet.clone())).await.unwrap();
    assert_eq!(body_json(second).await["remaining"], 0);

    let third = app.oneshot(execute_request("u1", snippet)).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(third).await;
    assert!(body["error"].as_str().unwrap().contains("Rate limit"));
    let reset_in = body["resetIn"].as_u64().unwrap();
    assert!(reset_in >= 1 && reset_in <= 60);
}

#[tokio::test]
async fn throttled_callers_do_not_affect_each_other() {
    let app = router(test_state(1, "http://127.0.0.1:1").await);
    let snippet = json!({ "code": "console.log(1);", "language": "javascript" });

    let a1 = app.clone().oneshot(execute_request("alice", snippet.clone())).await.unwrap();
    assert_eq!(a1.status(), StatusCode::OK);

    let a2 = app.clone().oneshot(execute_request("alice", snippet.clone())).await.unwrap();
    assert_eq!(a2.status(), StatusCode::TOO_MANY_REQUESTS);

    // Alice being throttled leaves Bob's window untouched.
    let b1 = app.oneshot(execute_request("bob", snippet)).await.unwrap();
    assert_eq!(b1.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_check_precedes_validation() {
    let app = router(test_state(1, "http://127.0.0.1:1").await);

    let ok = app
        .clone()
        .oneshot(execute_request("u1", json!({ "code": "console.log(1);", "language": "javascript" })))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    // Even an invalid body is throttled once the quota is spent.
    let throttled = app
        .oneshot(execute_request("u1", json!({ "language": "nope" })))
        .await
        .unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
}
