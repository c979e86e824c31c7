//! HTTP surface: handlers, per-route interceptor chains and the OpenAPI document.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, Query, State},
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::info;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::db::{DailyCounter, RecentAnalysis, Stats};
use crate::error::{AnalysisError, ErrorBody};
use crate::interceptors::{InterceptorChain, RateLimit, RequestContext, Sanitize};
use crate::pipeline::AnalysisPipeline;
use crate::rate_limit::RateLimiter;
use crate::sentiment::{AnalysisRecord, BatchResult, Sentiment, WordSentiment};

const DEFAULT_DAILY_LIMIT: i64 = 30;
const MAX_DAILY_LIMIT: i64 = 365;

#[derive(OpenApi)]
#[openapi(
    paths(analyze, analyze_batch, get_stats, get_daily_stats, memory_cleanup, health),
    components(
        schemas(
            AnalyzeRequest,
            AnalyzeResponse,
            BatchRequest,
            BatchResponse,
            BatchResult,
            Stats,
            RecentAnalysis,
            DailyCounter,
            CleanupResponse,
            HealthResponse,
            WordSentiment,
            Sentiment,
            ErrorBody
        )
    ),
    tags((name = "sentiment", description = "Sentiment Analysis API"))
)]
pub struct ApiDoc;

pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    /// `[Sanitize, RateLimit]`, used by both analyze routes.
    pub analyze_chain: InterceptorChain,
    /// `[RateLimit]`
    pub stats_chain: InterceptorChain,
    /// Key clients on `X-Forwarded-For` instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl AppState {
    /// All rate-limited routes share one limiter.
    pub fn new(pipeline: Arc<AnalysisPipeline>, limiter: Arc<RateLimiter>) -> Self {
        let rate_limit = Arc::new(RateLimit::new(limiter));
        let analyze_chain = InterceptorChain::new()
            .with(Arc::new(Sanitize))
            .with(rate_limit.clone());
        let stats_chain = InterceptorChain::new().with(rate_limit);
        info!(
            analyze = ?analyze_chain.names(),
            stats = ?stats_chain.names(),
            "interceptor chains ready"
        );

        Self {
            pipeline,
            analyze_chain,
            stats_chain,
            trust_forwarded_for: false,
        }
    }

    /// Only enable behind a proxy that overwrites the header.
    pub fn with_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    #[serde(default)]
    #[schema(example = "I love this!")]
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    pub sentiment: Sentiment,
    pub score: f64,
    pub positive_score: f64,
    pub word_sentiments: Vec<WordSentiment>,
}

impl From<AnalysisRecord> for AnalyzeResponse {
    fn from(record: AnalysisRecord) -> Self {
        Self {
            sentiment: record.sentiment,
            score: record.score,
            positive_score: record.positive_score,
            word_sentiments: record.word_sentiments,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchRequest {
    #[serde(default)]
    pub texts: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    pub results: Vec<BatchResult>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub success: bool,
    /// Model resources released by this call.
    pub collected_objects: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub models_loaded: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DailyQuery {
    /// Number of days to return (default 30, max 365).
    pub limit: Option<i64>,
}

/// Identifies the caller for rate limiting: the peer address, or the first
/// `X-Forwarded-For` entry when the state trusts that header. Falls back to
/// `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        if state.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(ip) = forwarded {
                return Ok(ClientId(ip.to_string()));
            }
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(ClientId(addr.ip().to_string()));
        }

        Ok(ClientId("unknown".to_string()))
    }
}

fn intercept<T: serde::de::DeserializeOwned>(
    chain: &InterceptorChain,
    client: ClientId,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<T, AnalysisError> {
    let Json(payload) = payload.map_err(|rejection| AnalysisError::InvalidPayload(rejection.body_text()))?;
    let mut ctx = RequestContext::new(client.0, payload);
    chain.run(&mut ctx)?;
    serde_json::from_value(ctx.payload).map_err(|e| AnalysisError::InvalidPayload(e.to_string()))
}

/// Analyze one text and store the result
#[utoipa::path(
    post,
    path = "/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Analysis stored", body = AnalyzeResponse),
        (status = 400, description = "Empty text or malformed body", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 500, description = "Analysis or database failure", body = ErrorBody)
    ),
    tag = "sentiment"
)]
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let request: AnalyzeRequest = match intercept(&state.analyze_chain, client, payload) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match state.pipeline.analyze_single(&request.text).await {
        Ok(record) => Json(AnalyzeResponse::from(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Classify up to 50 texts without storing them
#[utoipa::path(
    post,
    path = "/analyze-batch",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Results in input order", body = BatchResponse),
        (status = 400, description = "Empty or oversized batch, or malformed body", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 500, description = "Batch analysis failure", body = ErrorBody)
    ),
    tag = "sentiment"
)]
pub async fn analyze_batch(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    const FAILURE: &str = "An error occurred during batch analysis";

    let request: BatchRequest = match intercept(&state.analyze_chain, client, payload) {
        Ok(request) => request,
        Err(e) => return e.into_response_with(FAILURE),
    };

    match state.pipeline.analyze_batch(request.texts).await {
        Ok(results) => Json(BatchResponse { results }).into_response(),
        Err(e) => e.into_response_with(FAILURE),
    }
}

/// Lifetime totals and the five most recent analyses
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Aggregate statistics", body = Stats),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 500, description = "Store failure", body = ErrorBody)
    ),
    tag = "sentiment"
)]
pub async fn get_stats(State(state): State<Arc<AppState>>, client: ClientId) -> Response {
    const FAILURE: &str = "An error occurred while fetching statistics";

    if let Err(e) = state.stats_chain.run(&mut RequestContext::new(client.0, Value::Null)) {
        return e.into_response();
    }

    match state.pipeline.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => e.into_response_with(FAILURE),
    }
}

/// Daily rollup counters, newest first
#[utoipa::path(
    get,
    path = "/stats/daily",
    params(DailyQuery),
    responses(
        (status = 200, description = "Daily counters", body = [DailyCounter]),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 500, description = "Store failure", body = ErrorBody)
    ),
    tag = "sentiment"
)]
pub async fn get_daily_stats(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    Query(query): Query<DailyQuery>,
) -> Response {
    const FAILURE: &str = "An error occurred while fetching statistics";

    if let Err(e) = state.stats_chain.run(&mut RequestContext::new(client.0, Value::Null)) {
        return e.into_response();
    }

    let limit = query.limit.unwrap_or(DEFAULT_DAILY_LIMIT).clamp(1, MAX_DAILY_LIMIT);
    match state.pipeline.store().daily_counters(limit).await {
        Ok(counters) => Json(counters).into_response(),
        Err(e) => AnalysisError::from(e).into_response_with(FAILURE),
    }
}

/// Release loaded models so their memory can be reclaimed
#[utoipa::path(
    post,
    path = "/memory-cleanup",
    responses((status = 200, description = "Models released", body = CleanupResponse)),
    tag = "sentiment"
)]
pub async fn memory_cleanup(State(state): State<Arc<AppState>>) -> Json<CleanupResponse> {
    let released = state.pipeline.release_models().await;
    Json(CleanupResponse {
        success: true,
        collected_objects: released,
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "sentiment"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        models_loaded: state.pipeline.models().is_initialized().await,
    })
}

pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/analyze", post(analyze))
        .route("/analyze-batch", post(analyze_batch))
        .route("/stats", get(get_stats))
        .route("/stats/daily", get(get_daily_stats))
        .route("/memory-cleanup", post(memory_cleanup))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(static_dir)) // Serve dashboard
        .layer(CorsLayer::permissive())
        .with_state(state)
}
