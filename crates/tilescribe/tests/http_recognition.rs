//! HTTP recognition client against a local generate endpoint.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tilescribe::recognition::{RetryPolicy, TokenProgress};
use tilescribe::{
    ModelRole, PipelineConfig, RecognitionBackend, RecognitionClient, RecognitionConfig, RecognitionRequest,
    TilescribeError, extract_bytes,
};

const STREAMED_BODY: &str = concat!(
    "{\"response\":\"Hello\",\"done\":false}\n",
    "{\"response\":\" wide\",\"done\":false}\n",
    "{\"response\":\" world\",\"done\":false}\n",
    "{\"response\":\"\",\"done\":true,\"eval_count\":3}\n",
);

#[derive(Clone, Copy)]
enum Behaviour {
    /// Answer 500 for the first `n` requests, then stream.
    FailThenStream(usize),
    /// Always answer 500.
    AlwaysFail,
    /// Answer with one JSON object.
    Single(&'static str),
    /// Sleep longer than any test timeout.
    Hang,
}

struct MockState {
    behaviour: Behaviour,
    hits: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

async fn generate(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body);

    match state.behaviour {
        Behaviour::FailThenStream(n) if hit < n => (StatusCode::INTERNAL_SERVER_ERROR, "model loading").into_response(),
        Behaviour::FailThenStream(_) => (StatusCode::OK, STREAMED_BODY).into_response(),
        Behaviour::AlwaysFail => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        Behaviour::Single(text) => Json(json!({"response": text, "done": true, "eval_count": 9})).into_response(),
        Behaviour::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            (StatusCode::OK, STREAMED_BODY).into_response()
        }
    }
}

async fn spawn_server(behaviour: Behaviour) -> (String, Arc<MockState>) {
    let state = Arc::new(MockState {
        behaviour,
        hits: AtomicUsize::new(0),
        bodies: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api/generate", addr), state)
}

fn config_for(endpoint: &str) -> RecognitionConfig {
    RecognitionConfig {
        endpoint: endpoint.to_string(),
        cooldown_ms: 0,
        ..Default::default()
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
}

#[tokio::test]
async fn test_retries_server_errors_then_decodes_stream() {
    let (endpoint, state) = spawn_server(Behaviour::FailThenStream(2)).await;
    let client = RecognitionClient::new(config_for(&endpoint))
        .unwrap()
        .with_retry_policy(fast_retries());

    let output = client
        .extract(RecognitionRequest::tile("read it", &[1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(output.text, "Hello wide world");
    assert_eq!(output.tokens, 3);
    assert_eq!(output.attempts, 3);

    let stats = client.stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.backoffs, 2);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.tokens, 3);

    let bodies = state.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], "llava:34b");
    assert_eq!(bodies[0]["prompt"], "read it");
    assert_eq!(bodies[0]["images"][0], "AQID");
    assert_eq!(bodies[0]["stream"], true);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (endpoint, state) = spawn_server(Behaviour::AlwaysFail).await;
    let client = RecognitionClient::new(config_for(&endpoint))
        .unwrap()
        .with_retry_policy(fast_retries());

    let result = client.extract(RecognitionRequest::tile("read it", &[0])).await;

    match result {
        Err(TilescribeError::Recognition { message, .. }) => assert!(message.contains("3 attempts"), "{}", message),
        other => panic!("expected recognition error, got {:?}", other),
    }
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
    assert_eq!(client.stats().failures, 1);
}

#[tokio::test]
async fn test_non_streaming_body_and_text_model() {
    let (endpoint, state) = spawn_server(Behaviour::Single("merged document")).await;
    let config = RecognitionConfig {
        stream: false,
        ..config_for(&endpoint)
    };
    let client = RecognitionClient::new(config).unwrap();

    let output = client
        .extract(RecognitionRequest::document_text("merge these"))
        .await
        .unwrap();

    assert_eq!(output.text, "merged document");
    assert_eq!(output.tokens, 9);

    let bodies = state.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], client.model_for(ModelRole::Text));
    assert_eq!(bodies[0]["stream"], false);
    assert!(bodies[0].get("images").is_none());
}

#[tokio::test]
async fn test_progress_callback_sees_every_fragment() {
    let (endpoint, _state) = spawn_server(Behaviour::FailThenStream(0)).await;
    let seen: Arc<Mutex<Vec<TokenProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let client = RecognitionClient::new(config_for(&endpoint))
        .unwrap()
        .with_progress(Arc::new(move |progress: &TokenProgress| {
            sink.lock().unwrap().push(progress.clone());
        }));

    client
        .extract(RecognitionRequest::tile("read it", &[7]))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let tokens: Vec<u64> = seen.iter().map(|p| p.tokens).collect();
    assert_eq!(tokens, vec![1, 2, 3]);
    assert_eq!(seen[2].characters, "Hello wide world".len() as u64);
    assert_eq!(seen[0].model, "llava:34b");
}

#[tokio::test]
async fn test_timeout_is_a_recognition_failure() {
    let (endpoint, _state) = spawn_server(Behaviour::Hang).await;
    let config = RecognitionConfig {
        tile_timeout_secs: 1,
        ..config_for(&endpoint)
    };
    let client = RecognitionClient::new(config)
        .unwrap()
        .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)));

    let result = client.extract(RecognitionRequest::tile("read it", &[0])).await;
    assert!(matches!(result, Err(TilescribeError::Recognition { .. })));
}

#[tokio::test]
async fn test_extract_bytes_end_to_end() {
    let (endpoint, state) = spawn_server(Behaviour::Single("Quarterly report")).await;

    let mut page = image::RgbaImage::from_pixel(400, 300, image::Rgba([255, 255, 255, 255]));
    for y in 100..140 {
        for x in 60..340 {
            page.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
        }
    }
    let mut png = Vec::new();
    page.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let mut config = PipelineConfig::default();
    config.recognition = RecognitionConfig {
        stream: false,
        ..config_for(&endpoint)
    };

    let output = extract_bytes(&png, &config).await.unwrap();

    assert_eq!(output.document, "Quarterly report");
    assert_eq!(output.records.len(), 1);
    assert_eq!(output.stats.selected_tiles, 1);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}
