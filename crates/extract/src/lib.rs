pub mod config;
pub mod error;
pub mod llm;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod normalizer;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod sink;
pub mod strategy;

pub use config::{BackendConfig, SamplingParams};
pub use error::{ExtractError, Result};
pub use llm::{ChatRequest, ModelClient, ModelOutput, ModelReply, OpenAiClient};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClient;
pub use normalizer::{DocumentKind, DocumentNormalizer, MAX_INPUT_CHARS};
pub use parser::ResponseParser;
pub use prompt::{Message, PromptAssembler, Role};
pub use retry::{RetryPolicy, RetryingClient};
pub use schema::{Entity, ExtractionResult, SensitivityLabel};
pub use sink::ResultSink;
pub use strategy::{ExtractionStrategy, FewShotStrategy, SchemaStrategy, StrategyKind};

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Text in, entities out: normalize, call the model through a strategy, log the result.
pub struct Extractor {
    client: Arc<dyn ModelClient>,
    strategy: Box<dyn ExtractionStrategy>,
    normalizer: DocumentNormalizer,
    sink: Option<Arc<ResultSink>>,
    timeout: Option<Duration>,
    persistence_failures: AtomicUsize,
    total_tokens: AtomicU64,
}

impl Extractor {
    pub fn new(client: Arc<dyn ModelClient>, strategy: Box<dyn ExtractionStrategy>) -> Self {
        Self {
            client,
            strategy,
            normalizer: DocumentNormalizer::default(),
            sink: None,
            timeout: None,
            persistence_failures: AtomicUsize::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_normalizer(mut self, normalizer: DocumentNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Deadline for the model call; expiry is reported as a backend error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn normalizer(&self) -> &DocumentNormalizer {
        &self.normalizer
    }

    /// Result-log appends that failed since startup.
    pub fn persistence_failures(&self) -> usize {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    /// Tokens reported by the backend across all calls, retries included.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    /// Extract from an uploaded document of a declared MIME type.
    pub async fn extract_from_document(&self, bytes: &[u8], mime: &str) -> Result<ExtractionResult> {
        let text = self.normalizer.normalize_bytes(bytes, mime)?;
        info!(mime = mime, bytes = bytes.len(), chars = text.chars().count(), "Document normalized");
        self.run(&text).await
    }

    /// Extract from raw policy text.
    pub async fn extract_from_text(&self, text: &str) -> Result<ExtractionResult> {
        let text = self.normalizer.normalize_text(text)?;
        self.run(&text).await
    }

    async fn run(&self, text: &str) -> Result<ExtractionResult> {
        let client = MeteredClient {
            inner: self.client.as_ref(),
            total_tokens: &self.total_tokens,
        };
        let call = self.strategy.extract(&client, text);
        let entities = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                ExtractError::Backend(anyhow::anyhow!("model call timed out after {:?}", limit))
            })??,
            None => call.await?,
        };

        info!(entities = entities.len(), strategy = ?self.strategy.kind(), "Extraction finished");

        if let Some(sink) = &self.sink {
            // The log is advisory; callers still get their result.
            if let Err(e) = sink.append(&entities).await {
                self.persistence_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, path = %sink.path().display(), "Failed to append extraction result");
            }
        }

        Ok(entities)
    }
}

struct MeteredClient<'a> {
    inner: &'a dyn ModelClient,
    total_tokens: &'a AtomicU64,
}

#[async_trait]
impl ModelClient for MeteredClient<'_> {
    async fn invoke(&self, request: ChatRequest) -> Result<ModelOutput> {
        let output = self.inner.invoke(request).await?;
        self.total_tokens.fetch_add(output.total_tokens, Ordering::Relaxed);
        Ok(output)
    }
}
