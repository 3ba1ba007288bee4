use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use agent_runner::{AgentExecutor, EngineConfig, ExecuteRequest, ExecutorOutput, RunEngine};
use assistants_core::{Error, FunctionCall, InstanceStore, MessageRole};

use super::{map_core_error, router, API_PREFIX};
use crate::auth::{digest_api_key, issue_jwt, Authenticator};
use crate::state::AppState;

const SECRET: &str = "test-secret";
const API_KEY: &str = "sk-test-key";

/// Echoes the last user message, asks for `get_weather` when the user
/// mentions the weather, and reports submitted outputs back.
struct RuleExecutor;

#[async_trait]
impl AgentExecutor for RuleExecutor {
    async fn execute(&self, request: ExecuteRequest) -> agent_runner::Result<ExecutorOutput> {
        if let Some(output) = request.tool_outputs.first() {
            return Ok(ExecutorOutput::message(format!(
                "The forecast says: {}",
                output.output
            )));
        }

        let last = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.text())
            .unwrap_or_default();
        if last.contains("weather") {
            return Ok(ExecutorOutput::tool_calls(vec![FunctionCall::new(
                "get_weather",
                r#"{"city":"Paris"}"#,
            )]));
        }
        Ok(ExecutorOutput::message(format!("echo: {}", last)))
    }
}

fn test_app_with(config: EngineConfig) -> Router {
    let engine = RunEngine::new(InstanceStore::shared(), Arc::new(RuleExecutor), config);
    let auth = Authenticator::new(SECRET, vec![digest_api_key(API_KEY)]);
    router(AppState::new(engine, auth, "http://worker.test"))
}

fn test_app() -> Router {
    test_app_with(EngineConfig::default())
}

fn token() -> String {
    issue_jwt(SECRET, "tester", 1).unwrap().0
}

async fn send(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let uri = if path.starts_with("/health") {
        path.to_string()
    } else {
        format!("{}{}", API_PREFIX, path)
    };

    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", bearer));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn call(app: &Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    send(app, method, path, body, Some(&token())).await
}

async fn create_assistant(app: &Router) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/assistants",
        Some(json!({
            "model": "llama-3",
            "name": "Forecaster",
            "tools": [{ "type": "function", "function": { "name": "get_weather" } }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn create_thread(app: &Router, text: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/threads",
        Some(json!({ "messages": [{ "role": "user", "content": text }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn start_run(app: &Router, thread_id: &str, assistant_id: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        &format!("/threads/{}/runs", thread_id),
        Some(json!({ "assistant_id": assistant_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn wait_for_status(app: &Router, thread_id: &str, run_id: &str, status: &str) -> Value {
    let path = format!("/threads/{}/runs/{}", thread_id, run_id);
    for _ in 0..250 {
        let (code, body) = call(app, "GET", &path, None).await;
        assert_eq!(code, StatusCode::OK, "{}", body);
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {} never reached {}", run_id, status);
}

#[test]
fn test_error_status_mapping() {
    let cases = [
        (Error::NotFound("run x".into()), StatusCode::NOT_FOUND),
        (Error::Conflict("busy".into()), StatusCode::CONFLICT),
        (Error::InvalidState("done".into()), StatusCode::CONFLICT),
        (
            Error::IncompleteSubmission("missing".into()),
            StatusCode::BAD_REQUEST,
        ),
        (Error::InvalidInput("blank".into()), StatusCode::BAD_REQUEST),
        (Error::ExpiredDeadline("late".into()), StatusCode::GONE),
        (Error::Executor("down".into()), StatusCode::BAD_GATEWAY),
    ];

    for (err, expected) in cases {
        let message = err.to_string();
        let (status, Json(body)) = map_core_error(err);
        assert_eq!(status, expected);
        assert_eq!(body.error, message);
    }
}

#[tokio::test]
async fn test_health_is_public_and_api_requires_auth() {
    let app = test_app();

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["worker_url"], "http://worker.test");
    assert_eq!(body["auth_enabled"], true);

    let (status, body) = send(&app, "GET", "/assistants", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, "POST", "/threads", None, Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_jwt_and_api_key_are_accepted() {
    let app = test_app();

    let (status, _) = send(&app, "GET", "/assistants", None, Some(&token())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/assistants", None, Some(API_KEY)).await;
    assert_eq!(status, StatusCode::OK);

    let foreign = issue_jwt("other-secret", "tester", 1).unwrap().0;
    let (status, _) = send(&app, "GET", "/assistants", None, Some(&foreign)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_assistant_crud() {
    let app = test_app();
    let first = create_assistant(&app).await;
    let second = create_assistant(&app).await;

    let (status, page) = call(&app, "GET", "/assistants?order=asc&limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["object"], "list");
    assert_eq!(page["data"][0]["id"], first.as_str());
    assert_eq!(page["data"][0]["tools"][0]["type"], "function");
    assert_eq!(page["has_more"], true);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/assistants/{}", second),
        Some(json!({ "name": "Renamed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Renamed");
    assert_eq!(body["model"], "llama-3");

    let (status, body) = call(&app, "DELETE", &format!("/assistants/{}", second), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = call(&app, "GET", &format!("/assistants/{}", second), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        "/assistants",
        Some(json!({ "model": "llama-3", "tools": [{ "type": "retrieval" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_message_run_completes() {
    let app = test_app();
    let assistant_id = create_assistant(&app).await;
    let thread_id = create_thread(&app, "Hi").await;
    let run_id = start_run(&app, &thread_id, &assistant_id).await;

    let run = wait_for_status(&app, &thread_id, &run_id, "completed").await;
    assert_eq!(run["object"], "thread.run");
    assert!(run["completed_at"].is_i64());
    assert!(run["required_action"].is_null());

    let (status, messages) = call(
        &app,
        "GET",
        &format!("/threads/{}/messages?order=asc", thread_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = messages["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[1]["role"], "assistant");
    assert_eq!(data[1]["content"][0]["text"], "echo: Hi");
    assert_eq!(data[1]["run_id"], run_id.as_str());

    let (status, steps) = call(
        &app,
        "GET",
        &format!("/threads/{}/runs/{}/steps", thread_id, run_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let steps = steps["data"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["type"], "message_creation");
    assert_eq!(steps[0]["status"], "completed");
    assert_eq!(
        steps[0]["step_details"]["message_creation"]["message_id"],
        data[1]["id"]
    );

    let step_id = steps[0]["id"].as_str().unwrap();
    let (status, step) = call(
        &app,
        "GET",
        &format!("/threads/{}/runs/{}/steps/{}", thread_id, run_id, step_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["object"], "thread.run.step");
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let app = test_app();
    let assistant_id = create_assistant(&app).await;
    let thread_id = create_thread(&app, "What is the weather?").await;
    let run_id = start_run(&app, &thread_id, &assistant_id).await;

    let run = wait_for_status(&app, &thread_id, &run_id, "requires_action").await;
    let action = &run["required_action"];
    assert_eq!(action["type"], "submit_tool_outputs");
    let call_id = action["submit_tool_outputs"]["tool_calls"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(
        action["submit_tool_outputs"]["tool_calls"][0]["function"]["name"],
        "get_weather"
    );

    let submit_path = format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id);
    let (status, _) = call(&app, "POST", &submit_path, Some(json!({ "tool_outputs": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "POST",
        &submit_path,
        Some(json!({ "tool_outputs": [{ "tool_call_id": call_id, "output": "Sunny" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    wait_for_status(&app, &thread_id, &run_id, "completed").await;

    let (_, messages) = call(&app, "GET", &format!("/threads/{}/messages", thread_id), None).await;
    assert_eq!(
        messages["data"][0]["content"][0]["text"],
        "The forecast says: Sunny"
    );

    let (_, steps) = call(
        &app,
        "GET",
        &format!("/threads/{}/runs/{}/steps?order=asc", thread_id, run_id),
        None,
    )
    .await;
    let steps = steps["data"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["type"], "tool_calls");
    assert_eq!(
        steps[0]["step_details"]["tool_calls"][0]["function"]["output"],
        "Sunny"
    );
    assert_eq!(steps[1]["type"], "message_creation");

    // A finished run takes no more outputs
    let (status, _) = call(
        &app,
        "POST",
        &submit_path,
        Some(json!({ "tool_outputs": [{ "tool_call_id": call_id, "output": "Rain" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_busy_thread_and_cancel() {
    let app = test_app();
    let assistant_id = create_assistant(&app).await;
    let thread_id = create_thread(&app, "weather please").await;
    let run_id = start_run(&app, &thread_id, &assistant_id).await;
    wait_for_status(&app, &thread_id, &run_id, "requires_action").await;

    let (status, _) = call(
        &app,
        "POST",
        &format!("/threads/{}/runs", thread_id),
        Some(json!({ "assistant_id": assistant_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, "DELETE", &format!("/threads/{}", thread_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let cancel_path = format!("/threads/{}/runs/{}/cancel", thread_id, run_id);
    let (status, body) = call(&app, "POST", &cancel_path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    // Cancelling again is not an error and changes nothing
    let (status, body) = call(&app, "POST", &cancel_path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = call(
        &app,
        "POST",
        &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
        Some(json!({ "tool_outputs": [{ "tool_call_id": "call_x", "output": "1" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_resources() {
    let app = test_app();
    let assistant_id = create_assistant(&app).await;
    let thread_id = create_thread(&app, "Hi").await;
    let other_thread = create_thread(&app, "Hello").await;
    let run_id = start_run(&app, &thread_id, &assistant_id).await;

    let (status, _) = call(&app, "GET", "/threads/thread_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        "/threads/thread_missing/runs",
        Some(json!({ "assistant_id": assistant_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "GET",
        &format!("/threads/{}/runs/{}", other_thread, run_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/threads/{}/messages", thread_id),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_after_deadline_is_gone() {
    let app = test_app_with(EngineConfig {
        tool_output_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    });
    let assistant_id = create_assistant(&app).await;
    let thread_id = create_thread(&app, "weather now").await;
    let run_id = start_run(&app, &thread_id, &assistant_id).await;
    let run = wait_for_status(&app, &thread_id, &run_id, "requires_action").await;
    let call_id = run["required_action"]["submit_tool_outputs"]["tool_calls"][0]["id"].clone();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let (status, _) = call(
        &app,
        "POST",
        &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
        Some(json!({ "tool_outputs": [{ "tool_call_id": call_id, "output": "late" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);

    let (_, run) = call(
        &app,
        "GET",
        &format!("/threads/{}/runs/{}", thread_id, run_id),
        None,
    )
    .await;
    assert_eq!(run["status"], "expired");
}

#[tokio::test]
async fn test_create_thread_and_run() {
    let app = test_app();
    let assistant_id = create_assistant(&app).await;

    let (status, run) = call(
        &app,
        "POST",
        "/threads/runs",
        Some(json!({
            "assistant_id": assistant_id,
            "thread": { "messages": [{ "content": "Good morning" }] },
            "instructions": "Be cheerful"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", run);
    assert_eq!(run["instructions"], "Be cheerful");

    let thread_id = run["thread_id"].as_str().unwrap();
    let run_id = run["id"].as_str().unwrap();
    wait_for_status(&app, thread_id, run_id, "completed").await;

    let (_, runs) = call(&app, "GET", &format!("/threads/{}/runs", thread_id), None).await;
    assert_eq!(runs["data"].as_array().unwrap().len(), 1);

    let (status, _) = call(
        &app,
        "POST",
        "/threads/runs",
        Some(json!({ "assistant_id": "asst_missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_modify_thread_metadata() {
    let app = test_app();
    let thread_id = create_thread(&app, "Hi").await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/threads/{}", thread_id),
        Some(json!({ "metadata": { "owner": "ops" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["object"], "thread");
    assert_eq!(body["metadata"]["owner"], "ops");

    let (_, fetched) = call(&app, "GET", &format!("/threads/{}", thread_id), None).await;
    assert_eq!(fetched["metadata"]["owner"], "ops");

    let (_, messages) = call(&app, "GET", &format!("/threads/{}/messages", thread_id), None).await;
    assert_eq!(messages["data"].as_array().unwrap().len(), 1);

    let (status, _) = call(
        &app,
        "POST",
        "/threads/thread_missing",
        Some(json!({ "metadata": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
