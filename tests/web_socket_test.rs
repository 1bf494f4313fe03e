use std::sync::Arc;
use std::time::Duration;

use axum_test::{TestServer, TestServerConfig, TestWebSocket};
use serde_json::{json, Value};
use space::questions::SEED_QUESTION;
use space::web_server::router;
use space::{ChatStore, ConversationConfig};

const PROMPT: &str = "Create a carbon calculator app";

fn test_server(store: &ChatStore) -> TestServer {
    let config = ConversationConfig {
        stage_delay: Duration::from_millis(20),
        ..ConversationConfig::default()
    };
    TestServerConfig::builder()
        .http_transport()
        .build_server(router(store.clone(), Arc::new(config)))
        .unwrap()
}

async fn connect(server: &TestServer) -> TestWebSocket {
    server.get_websocket("/ws").await.into_websocket().await
}

/// Skips events until one matches `wanted`.
async fn next_event(ws: &mut TestWebSocket, wanted: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event: Value = ws.receive_json().await;
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn of_type(kind: &'static str) -> impl Fn(&Value) -> bool {
    move |event| event["type"] == kind
}

#[tokio::test]
async fn test_socket_on_empty_store_redirects() {
    let store = ChatStore::new();
    let server = test_server(&store);
    let mut ws = connect(&server).await;

    let event: Value = ws.receive_json().await;
    assert_eq!(event, json!({ "type": "redirect", "to": "/" }));
}

#[tokio::test]
async fn test_turn_streams_a_clarification_sequence() {
    let store = ChatStore::seeded(PROMPT);
    let server = test_server(&store);
    let mut ws = connect(&server).await;

    let first = next_event(&mut ws, of_type("message")).await;
    assert_eq!(first["message"]["content"], PROMPT);
    assert_eq!(first["message"]["role"], "user");

    let version = next_event(&mut ws, |e| e["type"] == "message" && e["message"]["type"] == "version").await;
    assert_eq!(version["message"]["version"], 1);

    let sequence = next_event(&mut ws, of_type("sequence")).await;
    let questions = sequence["questions"].as_array().unwrap();
    assert_eq!(questions[0], SEED_QUESTION);
    assert!((2..=4).contains(&questions.len()));
    assert_eq!(sequence["typing_speed_ms"], 30);

    ws.send_json(&json!({
        "type": "answer",
        "message_id": sequence["message_id"],
        "question": SEED_QUESTION,
        "answer": "Yes",
    }))
    .await;
    let composer = next_event(&mut ws, |e| e["type"] == "composer" && e["text"] != "").await;
    assert_eq!(composer["text"], format!("{} Yes", SEED_QUESTION));
}

#[tokio::test]
async fn test_bad_commands_get_error_replies() {
    let store = ChatStore::seeded(PROMPT);
    let server = test_server(&store);
    let mut ws = connect(&server).await;
    next_event(&mut ws, of_type("sequence")).await;

    ws.send_json(&json!({ "type": "launch" })).await;
    let error = next_event(&mut ws, of_type("error")).await;
    assert!(error["reason"].as_str().unwrap().contains("unrecognised command"));

    ws.send_json(&json!({ "type": "fix_error" })).await;
    let error = next_event(&mut ws, of_type("error")).await;
    assert_eq!(error["reason"], "there is no error to fix");

    ws.send_json(&json!({ "type": "restore_version", "version": 7 })).await;
    let error = next_event(&mut ws, of_type("error")).await;
    assert_eq!(error["reason"], "version 7 does not exist");

    ws.send_json(&json!({ "type": "set_field", "field": "electricity", "value": "100" })).await;
    let preview = next_event(&mut ws, |e| e["type"] == "preview" && e["total"] == "50.00").await;
    assert_eq!(preview["values"][0]["value"], "100");
}

#[tokio::test]
async fn test_reload_replays_clarifications_as_static_questions() {
    let store = ChatStore::seeded(PROMPT);
    let server = test_server(&store);
    let mut first_tab = connect(&server).await;
    let sequence = next_event(&mut first_tab, of_type("sequence")).await;
    first_tab
        .send_json(&json!({
            "type": "answer",
            "message_id": sequence["message_id"],
            "question": SEED_QUESTION,
            "answer": "No",
        }))
        .await;
    next_event(&mut first_tab, |e| e["type"] == "composer" && e["text"] != "").await;

    let mut second_tab = connect(&server).await;
    let replayed = next_event(&mut second_tab, of_type("clarification")).await;
    assert_eq!(replayed["message_id"], sequence["message_id"]);
    assert_eq!(replayed["question"], SEED_QUESTION);
    assert_eq!(replayed["answer"], "No");

    first_tab.send_json(&json!({ "type": "submit", "text": "Add charts" })).await;
    let seen = next_event(&mut second_tab, |e| e["type"] == "message" && e["message"]["content"] == "Add charts").await;
    assert_eq!(seen["message"]["role"], "user");
    let version = next_event(&mut second_tab, |e| e["type"] == "message" && e["message"]["version"] == 2).await;
    assert_eq!(version["message"]["type"], "version");
}

#[tokio::test]
async fn test_new_prompt_moves_open_tabs_to_the_new_chat() {
    let store = ChatStore::seeded(PROMPT);
    let server = test_server(&store);
    let mut ws = connect(&server).await;
    next_event(&mut ws, of_type("message")).await;

    server
        .post("/prompt")
        .form(&[("prompt", "Build a recycling tracker")])
        .await;

    let redirect = next_event(&mut ws, of_type("redirect")).await;
    assert_eq!(redirect["to"], "/chat");
    assert_eq!(store.messages().await[0].content, "Build a recycling tracker");
}
