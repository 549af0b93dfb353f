//! Integration tests for the LarkRelay webhook.
//!
//! Drives the real router with an in-memory store; the three outbound HTTP
//! surfaces (token exchange, message reply, generateContent) are wiremock
//! servers.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use larkrelay_server::{
    build_router, FeishuClient, GeminiClient, KvStore, MemoryKv, RelayBridge, RelayState,
    SessionStore, Turn,
};

const MODEL: &str = "gemini-1.5-flash-latest";

struct TestApp {
    router: Router,
    store: Arc<dyn KvStore>,
    feishu: MockServer,
    gemini: MockServer,
}

async fn spawn_app(allowed_users: Vec<String>) -> TestApp {
    let feishu_server = MockServer::start().await;
    let gemini_server = MockServer::start().await;

    let store: Arc<dyn KvStore> = Arc::new(MemoryKv::new());

    let feishu_client = FeishuClient::new("app".into(), "secret".into(), false, store.clone())
        .with_base_url(format!("{}/open-apis", feishu_server.uri()));
    let gemini_client =
        GeminiClient::new(Some("test-key".into()), MODEL.into()).with_base_url(gemini_server.uri());

    let bridge = RelayBridge::new(
        SessionStore::new(store.clone(), 3600),
        Arc::new(feishu_client),
        Arc::new(gemini_client),
        allowed_users,
    );

    let router = build_router(Arc::new(RelayState {
        bridge,
        store: store.clone(),
    }));

    TestApp {
        router,
        store,
        feishu: feishu_server,
        gemini: gemini_server,
    }
}

/// Mount the token exchange endpoint, expecting it to be hit `expected` times.
async fn mount_token_exchange(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/open-apis/auth/v3/tenant_access_token/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "tenant_access_token": "t-test",
            "expire": 7200,
        })))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_reply(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/open-apis/im/v1/messages/.*/reply$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "ok" })),
        )
        .mount(server)
        .await;
}

async fn mount_completion(server: &MockServer, reply_text: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [
                { "content": { "parts": [ { "text": reply_text } ] } }
            ]
        })))
        .mount(server)
        .await;
}

async fn post_webhook(router: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhook/feishu")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, json)
}

fn message_event(chat_id: &str, sender: &str, text: &str) -> Value {
    json!({
        "header": { "event_type": "im.message.receive_v1" },
        "event": {
            "sender": { "sender_id": { "open_id": sender } },
            "message": {
                "message_id": "om_test",
                "chat_id": chat_id,
                "message_type": "text",
                "content": json!({ "text": text }).to_string(),
            }
        }
    })
}

/// Bodies of all requests the mock server received, as UTF-8.
async fn received_bodies(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Challenge & Classification
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn challenge_is_echoed() {
    let app = spawn_app(vec![]).await;

    let (status, json) = post_webhook(
        &app.router,
        json!({ "challenge": "abc123", "type": "url_verification" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["challenge"], "abc123");
}

#[tokio::test]
async fn unrecognized_payload_is_rejected() {
    let app = spawn_app(vec![]).await;

    let (status, json) = post_webhook(&app.router, json!({ "something": "else" })).await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json["status"], "unrecognized payload");
}

#[tokio::test]
async fn non_message_event_is_ignored_without_outbound_calls() {
    let app = spawn_app(vec![]).await;

    let (status, json) = post_webhook(
        &app.router,
        json!({ "header": { "event_type": "im.chat.updated_v1" }, "event": {} }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "event ignored");
    assert!(app.feishu.received_requests().await.unwrap_or_default().is_empty());
    assert!(app.gemini.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn empty_message_is_ignored() {
    let app = spawn_app(vec![]).await;

    let (status, json) =
        post_webhook(&app.router, message_event("oc_1", "ou_alice", " @_user_1 ")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "empty message ignored");
}

#[tokio::test]
async fn disallowed_sender_is_reported() {
    let app = spawn_app(vec!["ou_alice".into()]).await;

    let (status, json) = post_webhook(&app.router, message_event("oc_1", "ou_eve", "hi")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "sender not allowed");
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct Path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_input_returns_result_without_touching_feishu() {
    let app = spawn_app(vec![]).await;
    mount_completion(&app.gemini, "translated").await;

    let (status, json) = post_webhook(&app.router, json!({ "input_text": "translate x" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "translated");
    assert!(app.feishu.received_requests().await.unwrap_or_default().is_empty());

    // Session storage untouched: the direct path derives no session key.
    let sessions = SessionStore::new(app.store.clone(), 3600);
    assert!(sessions
        .get_history(&SessionStore::session_key("oc_1", "ou_alice"))
        .await
        .is_empty());

    // No history: the request carries exactly one content entry.
    let bodies = received_bodies(&app.gemini).await;
    assert_eq!(bodies.len(), 1);
    let request: Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(request["contents"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_direct_input_is_ignored() {
    let app = spawn_app(vec![]).await;

    let (status, json) = post_webhook(&app.router, json!({ "input_text": "   " })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "empty input ignored");
    assert!(app.gemini.received_requests().await.unwrap_or_default().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_message_relays_and_saves_history() {
    let app = spawn_app(vec![]).await;
    mount_token_exchange(&app.feishu, 1).await;
    mount_reply(&app.feishu).await;
    mount_completion(&app.gemini, "the answer").await;

    let (status, json) =
        post_webhook(&app.router, message_event("oc_1", "ou_alice", "a question")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");

    // The reply delivered the completion text.
    let bodies = received_bodies(&app.feishu).await;
    assert!(bodies.iter().any(|b| b.contains("the answer")));

    // One user turn plus one model turn were persisted.
    let sessions = SessionStore::new(app.store.clone(), 3600);
    let key = SessionStore::session_key("oc_1", "ou_alice");
    let history = sessions.get_history(&key).await;
    assert_eq!(
        history,
        vec![Turn::user("a question"), Turn::model("the answer")]
    );
}

#[tokio::test]
async fn second_message_carries_history_and_reuses_token() {
    let app = spawn_app(vec![]).await;
    // Exchange endpoint invoked at most once within the TTL window.
    mount_token_exchange(&app.feishu, 1).await;
    mount_reply(&app.feishu).await;
    mount_completion(&app.gemini, "ok").await;

    post_webhook(&app.router, message_event("oc_1", "ou_alice", "first")).await;
    post_webhook(&app.router, message_event("oc_1", "ou_alice", "second")).await;

    let bodies = received_bodies(&app.gemini).await;
    assert_eq!(bodies.len(), 2);

    // Second request: two stored turns plus the new prompt.
    let request: Value = serde_json::from_str(&bodies[1]).unwrap();
    let contents = request["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[2]["parts"][0]["text"], "second");
}

#[tokio::test]
async fn sessions_are_distinct_across_senders() {
    let app = spawn_app(vec![]).await;
    mount_token_exchange(&app.feishu, 1).await;
    mount_reply(&app.feishu).await;
    mount_completion(&app.gemini, "ok").await;

    post_webhook(&app.router, message_event("oc_1", "ou_alice", "from alice")).await;
    post_webhook(&app.router, message_event("oc_1", "ou_bob", "from bob")).await;

    let sessions = SessionStore::new(app.store.clone(), 3600);
    let alice = sessions
        .get_history(&SessionStore::session_key("oc_1", "ou_alice"))
        .await;
    let bob = sessions
        .get_history(&SessionStore::session_key("oc_1", "ou_bob"))
        .await;

    assert_eq!(alice[0].text, "from alice");
    assert_eq!(bob[0].text, "from bob");
}

#[tokio::test]
async fn completion_failure_replies_with_fallback() {
    let app = spawn_app(vec![]).await;
    mount_token_exchange(&app.feishu, 1).await;
    mount_reply(&app.feishu).await;
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&app.gemini)
        .await;

    let (status, json) = post_webhook(&app.router, message_event("oc_1", "ou_alice", "hi")).await;

    // The caller still gets success; the user sees the fallback text.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");

    let bodies = received_bodies(&app.feishu).await;
    assert!(bodies.iter().any(|b| b.contains("机器人出了一点小问题")));
}

#[tokio::test]
async fn reply_failure_is_swallowed() {
    let app = spawn_app(vec![]).await;
    mount_token_exchange(&app.feishu, 1).await;
    mount_completion(&app.gemini, "ok").await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/open-apis/im/v1/messages/.*/reply$"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&app.feishu)
        .await;

    let (status, json) = post_webhook(&app.router, message_event("oc_1", "ou_alice", "hi")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
}

// ─────────────────────────────────────────────────────────────────────────────
// Clear Command
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn clear_command_resets_history_without_completion_call() {
    let app = spawn_app(vec![]).await;
    mount_token_exchange(&app.feishu, 1).await;
    mount_reply(&app.feishu).await;

    // Seed an existing conversation.
    let sessions = SessionStore::new(app.store.clone(), 3600);
    let key = SessionStore::session_key("oc_1", "ou_alice");
    sessions
        .save_history(&key, &[Turn::user("old"), Turn::model("old reply")])
        .await
        .unwrap();

    let (status, json) =
        post_webhook(&app.router, message_event("oc_1", "ou_alice", "/CLEAR")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert!(sessions.get_history(&key).await.is_empty());
    assert!(app.gemini.received_requests().await.unwrap_or_default().is_empty());

    // The confirmation was delivered.
    let bodies = received_bodies(&app.feishu).await;
    assert!(bodies.iter().any(|b| b.contains("历史对话已清除")));
}
