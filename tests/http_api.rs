//! HTTP surface of the chat core, driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use babyshield_chat::config::Config;
use babyshield_chat::http::{HttpState, MAX_QUERY_CHARS, router};
use common::{Behavior, ScriptedLlm, good_explanation, harness, peanut_snack};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app_with(config: Config, synth: Behavior) -> (Router, common::Harness) {
    let llm = ScriptedLlm::new(Behavior::HttpError(500), synth);
    let h = harness(llm, &config);
    let app = router(HttpState {
        config: Arc::new(config),
        orchestrator: h.orchestrator.clone(),
    });
    (app, h)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_conversation(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/chat/conversation")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _h) = app_with(Config::default(), Behavior::Json(good_explanation())).await;
    let (status, body) = send(
        app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unknown_scan_is_404() {
    let (app, _h) = app_with(Config::default(), Behavior::Json(good_explanation())).await;
    let (status, body) = send(
        app,
        post_conversation(json!({"scan_id": "missing", "user_query": "any recalls?"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_inline_scan_reply() {
    let (app, _h) = app_with(Config::default(), Behavior::Json(good_explanation())).await;
    let (status, body) = send(
        app,
        post_conversation(json!({
            "scan_data": peanut_snack(),
            "user_query": "Does this have anything my peanut allergic kid can't eat?",
            "conversation_id": "conv-9"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversation_id"], "conv-9");
    assert_eq!(body["intent"], "allergy_question");
    assert_eq!(body["tool_output"]["hits"], json!(["peanut"]));
    assert_eq!(body["fallback_used"], json!(false));
    assert!(body["explanation"]["disclaimer"].as_str().is_some());
}

#[tokio::test]
async fn test_stored_scan_with_failing_model_still_answers() {
    let (app, h) = app_with(Config::default(), Behavior::HttpError(503)).await;
    h.store.insert("s1", peanut_snack()).await;
    let (status, body) = send(
        app,
        post_conversation(json!({"scan_id": "s1", "user_query": "peanut?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fallback_used"], json!(true));
    assert_eq!(body["fallback_reason"], "llm_failed");
}

#[tokio::test]
async fn test_malformed_explanation_is_502() {
    let mut payload = good_explanation();
    payload["score"] = json!(3);
    let (app, _h) = app_with(Config::default(), Behavior::Json(payload)).await;
    let (status, body) = send(
        app,
        post_conversation(json!({"scan_data": peanut_snack(), "user_query": "allergy?"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILURE");
}

#[tokio::test]
async fn test_missing_scan_reference_is_400() {
    let (app, _h) = app_with(Config::default(), Behavior::Json(good_explanation())).await;
    let (status, _) = send(app, post_conversation(json!({"user_query": "recall?"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_overlong_query_is_400() {
    let (app, _h) = app_with(Config::default(), Behavior::Json(good_explanation())).await;
    let query = "a".repeat(MAX_QUERY_CHARS + 1);
    let (status, body) = send(
        app,
        post_conversation(json!({"scan_data": {}, "user_query": query})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PARAMS");
}

#[tokio::test]
async fn test_kill_switch_is_403() {
    let mut config = Config::default();
    config.runtime.chat_enabled = false;
    let (app, _h) = app_with(config, Behavior::Json(good_explanation())).await;
    let (status, body) = send(
        app,
        post_conversation(json!({"scan_data": {}, "user_query": "recall?"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn test_flags_follow_rollout_bucket() {
    let mut config = Config::default();
    config.runtime.chat_rollout_pct = 18;
    let (app, _h) = app_with(config, Behavior::Json(good_explanation())).await;

    // sha1("abc") starts a999, bucket 43417 % 100 = 17
    let (status, body) = send(
        app.clone(),
        Request::builder()
            .uri("/api/v1/chat/flags?user_id=abc")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chat_rollout_pct"], json!(18));
    assert_eq!(body["chat_enabled_for_user"], json!(true));

    let (_, anonymous) = send(
        app,
        Request::builder()
            .uri("/api/v1/chat/flags")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(anonymous["chat_enabled_for_user"], json!(false));
}
