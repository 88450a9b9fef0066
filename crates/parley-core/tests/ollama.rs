//! Integration tests for the Ollama client and a full chat turn using wiremock.

use parley_core::{
    ChatMessage, ChatSession, CancellationToken, DisplayMessage, FlushMode, FlushPolicy,
    GenerateOptions, InlineCompleter, OllamaClient, TransportError, TurnState,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HELLO_NDJSON: &str = concat!(
    r#"{"model":"qwen2.5-coder:1.5b","message":{"role":"assistant","content":"Hel"},"done":false}"#,
    "\n",
    r#"{"model":"qwen2.5-coder:1.5b","message":{"role":"assistant","content":"lo"},"done":false}"#,
    "\n",
    r#"{"model":"qwen2.5-coder:1.5b","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
    "\n",
);

fn ai_texts(sink: &[DisplayMessage]) -> Vec<String> {
    sink.iter()
        .filter_map(|m| match m {
            DisplayMessage::AiResponse { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chat_turn_streams_deltas_and_commits_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "qwen2.5-coder:1.5b",
            "stream": true,
            "messages": [
                {"role": "system", "content": "You are a helpful AI agent."},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(HELLO_NDJSON))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "qwen2.5-coder:1.5b");
    let mut session = ChatSession::new(client, FlushPolicy::default());
    let mut sink = Vec::new();

    let outcome = session
        .ask("hi", &mut sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Completed);
    assert_eq!(ai_texts(&sink).concat(), "Hello");
    assert_eq!(session.log().last(), Some(&ChatMessage::assistant("Hello")));
}

#[tokio::test]
async fn chat_turn_reply_snapshot_ends_with_full_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HELLO_NDJSON))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "qwen2.5-coder:1.5b");
    let mut session = ChatSession::new(client, FlushPolicy::new(FlushMode::FullReplySnapshot));
    let mut sink = Vec::new();
    session
        .ask("hi", &mut sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ai_texts(&sink).last().map(String::as_str), Some("Hello"));
}

#[tokio::test]
async fn chat_turn_error_status_becomes_error_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model 'nope' not found"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "nope");
    let mut session = ChatSession::new(client, FlushPolicy::default());
    let mut sink = Vec::new();

    let outcome = session
        .ask("hi", &mut sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Failed);
    assert_eq!(session.log().len(), 3);
    assert_eq!(
        session.log().last().unwrap().content,
        "Error: Server responded with status 404 (model 'nope' not found)"
    );
}

#[tokio::test]
async fn chat_turn_survives_garbage_lines() {
    let server = MockServer::start().await;
    let body = format!("not json at all\n{HELLO_NDJSON}");

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "qwen2.5-coder:1.5b");
    let mut session = ChatSession::new(client, FlushPolicy::default());
    let outcome = session
        .ask("hi", &mut Vec::<DisplayMessage>::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reply.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn connection_refused_is_reported_in_log() {
    // grab a free port and close it again so nothing is listening
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = OllamaClient::new(&format!("http://{addr}"), "qwen2.5-coder:1.5b");
    let mut session = ChatSession::new(client, FlushPolicy::default());

    let outcome = session
        .ask("hi", &mut Vec::<DisplayMessage>::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Failed);
    assert_eq!(session.log().len(), 3);
    assert!(session.log().last().unwrap().content.starts_with("Error: "));
}

#[tokio::test]
async fn generate_returns_response_field() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "model": "starcoder",
            "prompt": "def compute_gcd(a,b):",
            "stream": false,
            "options": {"num_predict": 32}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "starcoder",
            "response": "\n    while b:\n        a, b = b, a % b\n    return a",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completer = InlineCompleter::new(OllamaClient::new(&server.uri(), "starcoder")).options(
        GenerateOptions {
            num_predict: Some(32),
            ..Default::default()
        },
    );

    let (spliced, suggestion) = completer
        .complete_at("def compute_gcd(a,b):\n\nprint(gcd(4, 6))\n", 1, 22)
        .await
        .unwrap();

    assert!(suggestion.contains("return a"));
    assert!(spliced.starts_with("def compute_gcd(a,b):\n    while b:"));
    assert!(spliced.ends_with("return a\n\nprint(gcd(4, 6))\n"));
}

#[tokio::test]
async fn generate_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "starcoder");
    let err = client.generate("x", None).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 500, .. }));
}

#[tokio::test]
async fn list_models_reads_tags() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {"name": "qwen2.5-coder:1.5b", "size": 1},
                {"name": "starcoder:latest", "size": 2}
            ]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "qwen2.5-coder:1.5b");
    assert_eq!(
        client.list_models().await.unwrap(),
        vec!["qwen2.5-coder:1.5b", "starcoder:latest"]
    );
    assert!(client.has_model("starcoder:latest").await.unwrap());
    assert!(!client.has_model("llama3.2").await.unwrap());
}
