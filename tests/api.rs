use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use sentiment_server::api::{router, AppState};
use sentiment_server::classifier::{top_of, Classifier, ClassifierOutput};
use sentiment_server::config::PipelineLimits;
use sentiment_server::db::SentimentStore;
use sentiment_server::lexicon::VaderLexicon;
use sentiment_server::models::{ModelBundle, ModelLoader, ModelManager};
use sentiment_server::pipeline::AnalysisPipeline;
use sentiment_server::rate_limit::RateLimiter;
use sentiment_server::sentiment::{LabelMap, LabelScore};
use sentiment_server::tokenizer::TextTokenizer;

/// One token per byte, framed by `<s>`=0 and `</s>`=2.
struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = vec![0];
        ids.extend(text.bytes().map(|b| b as u32 + 10));
        ids.push(2);
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids.iter().filter(|id| **id >= 10).map(|id| (id - 10) as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

struct StubClassifier {
    broken: bool,
}

impl StubClassifier {
    fn distribution(text: &str) -> Vec<LabelScore> {
        let lower = text.to_lowercase();
        let (neg, neu, pos) = if lower.contains("love") || lower.contains("great") {
            (0.03, 0.07, 0.90)
        } else if lower.contains("hate") || lower.contains("awful") {
            (0.88, 0.08, 0.04)
        } else {
            (0.20, 0.60, 0.20)
        };
        vec![
            LabelScore { label: "LABEL_0".into(), score: neg },
            LabelScore { label: "LABEL_1".into(), score: neu },
            LabelScore { label: "LABEL_2".into(), score: pos },
        ]
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, text: &str) -> Result<LabelScore> {
        if self.broken {
            bail!("sidecar unavailable");
        }
        let distribution = Self::distribution(text);
        Ok(top_of(&distribution).cloned().unwrap())
    }

    async fn classify_all(&self, text: &str) -> Result<ClassifierOutput> {
        if self.broken {
            bail!("sidecar unavailable");
        }
        Ok(ClassifierOutput::Distribution(Self::distribution(text)))
    }

    async fn classify_all_batch(&self, texts: &[String]) -> Result<Vec<Vec<LabelScore>>> {
        if self.broken {
            bail!("sidecar unavailable");
        }
        Ok(texts.iter().map(|t| Self::distribution(t)).collect())
    }
}

struct StubLoader {
    broken: bool,
}

#[async_trait]
impl ModelLoader for StubLoader {
    async fn load(&self) -> Result<ModelBundle> {
        Ok(ModelBundle {
            tokenizer: Arc::new(ByteTokenizer),
            classifier: Arc::new(StubClassifier { broken: self.broken }),
            lexicon: Arc::new(VaderLexicon::builtin()),
        })
    }
}

struct TestApp {
    router: Router,
    store: SentimentStore,
}

async fn build_app(rate_limit: usize, broken: bool) -> TestApp {
    build_app_with(rate_limit, broken, false).await
}

async fn build_app_with(rate_limit: usize, broken: bool, trust_forwarded_for: bool) -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SentimentStore::from_pool(pool);
    store.init_schema().await.unwrap();

    let models = Arc::new(ModelManager::new(Arc::new(StubLoader { broken })));
    let pipeline = Arc::new(AnalysisPipeline::new(
        models,
        store.clone(),
        LabelMap::default(),
        PipelineLimits::default(),
    ));
    let limiter = Arc::new(RateLimiter::new(rate_limit, Duration::from_secs(60)));
    let state = Arc::new(AppState::new(pipeline, limiter).with_forwarded_for(trust_forwarded_for));

    TestApp {
        router: router(state, Path::new("does-not-exist")),
        store,
    }
}

/// Sends a request as if it arrived from `peer` (an IP address).
async fn send(app: &TestApp, method: &str, uri: &str, peer: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    dispatch(app, peer, request).await
}

async fn dispatch(app: &TestApp, peer: &str, mut request: Request<Body>) -> (StatusCode, Value) {
    let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_analyze_returns_and_stores_result() {
    let app = build_app(10, false).await;

    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.1", Some(json!({ "text": "I love this <b>product</b>!" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sentiment"], "positive");
    assert!((body["score"].as_f64().unwrap() - 0.90).abs() < 1e-9);
    assert!((body["positive_score"].as_f64().unwrap() - 0.90).abs() < 1e-9);
    let words: Vec<&str> = body["word_sentiments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["text"].as_str().unwrap())
        .collect();
    assert!(words.contains(&"love"));

    let (status, stats) = send(&app, "GET", "/stats", "10.0.0.1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["positive"], 1);
    assert_eq!(stats["negative"], 0);
    assert_eq!(stats["recent"][0]["text"], "I love this bproductb!");
}

#[tokio::test]
async fn test_empty_text_is_rejected() {
    let app = build_app(10, false).await;

    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.2", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No text provided");

    // Nothing survives sanitizing.
    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.2", Some(json!({ "text": "<>#$%" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No text provided");

    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let app = build_app(3, false).await;

    for _ in 0..3 {
        let (status, _) = send(&app, "POST", "/analyze", "10.0.0.3", Some(json!({ "text": "fine day" }))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.3", Some(json!({ "text": "fine day" }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded. Please try again later.");

    // Stats share the same window.
    let (status, _) = send(&app, "GET", "/stats", "10.0.0.3", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = send(&app, "POST", "/analyze", "10.0.0.4", Some(json!({ "text": "fine day" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.stats().await.unwrap().total, 4);
}

#[tokio::test]
async fn test_batch_limits_and_ordering() {
    let app = build_app(100, false).await;

    let (status, body) = send(&app, "POST", "/analyze-batch", "10.0.0.5", Some(json!({ "texts": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No texts provided");

    let too_many: Vec<String> = (0..51).map(|i| format!("text {}", i)).collect();
    let (status, body) = send(&app, "POST", "/analyze-batch", "10.0.0.5", Some(json!({ "texts": too_many }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Batch size too large. Maximum 50 texts per request.");

    let texts: Vec<String> = (0..50)
        .map(|i| if i % 2 == 0 { format!("love {}", i) } else { format!("hate {}", i) })
        .collect();
    let (status, body) = send(&app, "POST", "/analyze-batch", "10.0.0.5", Some(json!({ "texts": texts }))).await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 50);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result["text"], texts[i].as_str());
        let expected = if i % 2 == 0 { "positive" } else { "negative" };
        assert_eq!(result["sentiment"], expected);
    }

    // Batches are not persisted.
    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_batch_items_are_sanitized() {
    let app = build_app(10, false).await;

    let (status, body) = send(&app, "POST", "/analyze-batch", "10.0.0.6", Some(json!({ "texts": ["great <stuff>", 12] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["text"], "great stuff");
    assert_eq!(body["results"][1]["text"], "");
    assert_eq!(body["results"][1]["sentiment"], "neutral");
}

#[tokio::test]
async fn test_inference_failures_use_route_messages() {
    let app = build_app(10, true).await;

    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.7", Some(json!({ "text": "hello" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "An error occurred during analysis");

    let (status, body) = send(&app, "POST", "/analyze-batch", "10.0.0.7", Some(json!({ "texts": ["hello"] }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "An error occurred during batch analysis");

    assert_eq!(app.store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_database_failure_reports_database_error() {
    let app = build_app(10, false).await;
    app.store.close().await;

    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.8", Some(json!({ "text": "hello" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Database error occurred");

    let (status, body) = send(&app, "GET", "/stats", "10.0.0.8", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "An error occurred while fetching statistics");
}

#[tokio::test]
async fn test_memory_cleanup_releases_and_reloads() {
    let app = build_app(10, false).await;

    let (status, body) = send(&app, "POST", "/memory-cleanup", "10.0.0.9", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "collected_objects": 0 }));

    let (_, first) = send(&app, "POST", "/analyze", "10.0.0.9", Some(json!({ "text": "awful service" }))).await;
    let (_, health) = send(&app, "GET", "/health", "10.0.0.9", None).await;
    assert_eq!(health, json!({ "status": "ok", "models_loaded": true }));

    let (_, body) = send(&app, "POST", "/memory-cleanup", "10.0.0.9", None).await;
    assert_eq!(body["collected_objects"], 3);
    let (_, health) = send(&app, "GET", "/health", "10.0.0.9", None).await;
    assert_eq!(health["models_loaded"], false);

    let (status, second) = send(&app, "POST", "/analyze", "10.0.0.9", Some(json!({ "text": "awful service" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_daily_stats_rollup() {
    let app = build_app(20, false).await;

    for text in ["love it", "hate it", "just a table", "great"] {
        send(&app, "POST", "/analyze", "10.0.0.10", Some(json!({ "text": text }))).await;
    }

    let (status, body) = send(&app, "GET", "/stats/daily?limit=5", "10.0.0.10", None).await;
    assert_eq!(status, StatusCode::OK);
    let days = body.as_array().unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0]["analysis_count"], 4);
    assert_eq!(days[0]["positive_count"], 2);
    assert_eq!(days[0]["negative_count"], 1);
    assert_eq!(days[0]["neutral_count"], 1);
}

#[tokio::test]
async fn test_openapi_document_and_fallback() {
    let app = build_app(10, false).await;

    let (status, doc) = send(&app, "GET", "/api-docs/openapi.json", "10.0.0.11", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/analyze"].is_object());
    assert!(doc["paths"]["/analyze-batch"].is_object());

    let (status, _) = send(&app, "GET", "/nope.html", "10.0.0.11", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn analyze_request(forwarded_for: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(json!({ "text": "fine day" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_forwarded_for_does_not_reset_peer_window() {
    let app = build_app(2, false).await;

    let mut admitted = 0;
    for i in 0..20 {
        let (status, _) = dispatch(&app, "10.0.0.12", analyze_request(&format!("1.1.1.{}", i))).await;
        if status == StatusCode::OK {
            admitted += 1;
        } else {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        }
    }
    assert_eq!(admitted, 2);
}

#[tokio::test]
async fn test_forwarded_for_is_honored_when_trusted() {
    let app = build_app_with(1, false, true).await;

    let (status, _) = dispatch(&app, "10.0.0.13", analyze_request("203.0.113.1")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = dispatch(&app, "10.0.0.13", analyze_request("203.0.113.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Same proxy peer, different forwarded client.
    let (status, _) = dispatch(&app, "10.0.0.13", analyze_request("203.0.113.2")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() {
    let app = build_app(10, false).await;

    let request = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json")
        .body(Body::from("{\"text\": "))
        .unwrap();
    let (status, body) = dispatch(&app, "10.0.0.14", request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request payload"));

    let request = Request::builder()
        .method("POST")
        .uri("/analyze-batch")
        .body(Body::from(json!({ "texts": ["hi"] }).to_string()))
        .unwrap();
    let (status, body) = dispatch(&app, "10.0.0.14", request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, "POST", "/analyze", "10.0.0.14", Some(json!({ "text": 42 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
