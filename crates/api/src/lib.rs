pub mod config;
pub mod error;
pub mod metrics;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    routing::get,
};
use policy_extract::prompt::load_template;
use policy_extract::{
    DocumentNormalizer, ExtractError, ExtractionResult, Extractor, FewShotStrategy, OpenAiClient,
    PromptAssembler, ResultSink, RetryPolicy, RetryingClient, SchemaStrategy, StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{Metrics, MetricsSnapshot, Outcome, TimedOperation};

pub struct AppState {
    pub extractor: Extractor,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(extractor: Extractor) -> Self {
        Self {
            extractor,
            metrics: Metrics::new(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct TextQuery {
    input_text: String,
}

/// Wire the production pipeline from configuration: OpenAI client with retries, strategy, result log.
pub fn build_extractor(config: &AppConfig) -> anyhow::Result<Extractor> {
    if config.backend.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; requests will be sent without credentials");
    }

    let client = OpenAiClient::new(&config.backend)?;
    let policy = RetryPolicy::new(
        config.retry.max_retries,
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
    );
    let client = RetryingClient::new(client, policy);

    let strategy: Box<dyn policy_extract::ExtractionStrategy> = match config.extraction.strategy {
        StrategyKind::Schema => Box::new(SchemaStrategy::new(PromptAssembler::from_file(
            &config.extraction.prompt_path,
        )?)),
        StrategyKind::FewShot => {
            let instructions = load_template(&config.extraction.few_shot_prompt_path)?;
            Box::new(FewShotStrategy::with_default_examples(&instructions))
        }
    };

    let mut normalizer = DocumentNormalizer::default();
    if config.server.allow_pdf {
        normalizer = normalizer.with_pdf();
    }

    Ok(Extractor::new(Arc::new(client), strategy)
        .with_normalizer(normalizer)
        .with_sink(Arc::new(ResultSink::new(&config.extraction.result_log_path)))
        .with_timeout(Duration::from_secs(config.extraction.request_timeout_secs)))
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/policy_extraction/", get(extract_text).post(extract_document))
        .route("/policy_extraction", get(extract_text).post(extract_document))
        .route("/metrics", get(get_metrics))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn extract_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<ExtractionResult>> {
    let request_id = Uuid::new_v4();
    let span = info_span!("extract_document", %request_id);

    async move {
        let (mime, bytes) = match read_upload(&mut multipart).await {
            Ok(upload) => upload,
            Err(err) => {
                state.metrics.record_request(Outcome::ClientError);
                return Err(err);
            }
        };

        info!(mime = %mime, bytes = bytes.len(), "Document upload received");
        let timer = TimedOperation::start();
        let result = state.extractor.extract_from_document(&bytes, &mime).await;
        finish(&state, timer, result)
    }
    .instrument(span)
    .await
}

/// The `file` part's declared content type and bytes.
async fn read_upload(multipart: &mut Multipart) -> ApiResult<(String, Vec<u8>)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?.to_vec();
        return Ok((mime, bytes));
    }
    Err(ApiError::BadRequest("Missing multipart field \"file\"".to_string()))
}

async fn extract_text(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TextQuery>,
) -> ApiResult<Json<ExtractionResult>> {
    let request_id = Uuid::new_v4();
    let span = info_span!("extract_text", %request_id);

    async move {
        info!(chars = query.input_text.chars().count(), "Text extraction requested");
        let timer = TimedOperation::start();
        let result = state.extractor.extract_from_text(&query.input_text).await;
        finish(&state, timer, result)
    }
    .instrument(span)
    .await
}

fn finish(
    state: &AppState,
    timer: TimedOperation,
    result: Result<ExtractionResult, ExtractError>,
) -> ApiResult<Json<ExtractionResult>> {
    match result {
        Ok(entities) => {
            state.metrics.record_request(Outcome::Success);
            state.metrics.record_extract(timer.elapsed(), entities.len());
            Ok(Json(entities))
        }
        Err(e) => {
            let err = ApiError::from(e);
            let outcome = if err.is_client_error() { Outcome::ClientError } else { Outcome::ServerError };
            state.metrics.record_request(outcome);
            Err(err)
        }
    }
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    let extractor = &state.extractor;
    Json(state.metrics.snapshot(extractor.persistence_failures(), extractor.total_tokens()))
}
