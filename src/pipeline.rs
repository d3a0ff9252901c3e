use crate::assemble::assemble;
use crate::extract::{FieldExtractor, FxConfig};
use crate::fetch::{ContentFetcher, FetchOutcome, FetcherConfig};
use crate::llm::LlmClient;
use crate::mirror::ImageMirror;
use crate::models::{IngestRequest, IngestResponse, ProductPayload, RawExtraction};
use crate::normalize::{NormalizationError, NormalizerConfig, ProductNormalizer};
use crate::storage::ObjectStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetcher: FetcherConfig,
    pub fx: FxConfig,
    pub normalizer: NormalizerConfig,
    /// Margins outside `[0, max_margin]` are caller bugs, not prices.
    pub max_margin: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            fx: FxConfig::default(),
            normalizer: NormalizerConfig::default(),
            max_margin: 1000.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let fx = FxConfig::from_env();
        Self {
            fetcher: FetcherConfig::from_env(),
            fx,
            normalizer: NormalizerConfig {
                usd_jpy: fx.usd_jpy,
                ..NormalizerConfig::default()
            },
            ..Self::default()
        }
    }
}

pub struct IngestPipeline {
    fetcher: ContentFetcher,
    extractor: FieldExtractor,
    normalizer: ProductNormalizer,
    mirror: ImageMirror,
    max_margin: f64,
}

impl IngestPipeline {
    pub fn new(config: PipelineConfig, llm: Arc<LlmClient>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            fetcher: ContentFetcher::new(config.fetcher),
            extractor: FieldExtractor::new(config.fx),
            normalizer: ProductNormalizer::new(llm, config.normalizer),
            mirror: ImageMirror::new(store),
            max_margin: config.max_margin,
        }
    }

    /// The whole ingestion: fetch → extract → assemble → normalize →
    /// mirror. Every stage except normalization degrades instead of
    /// failing; the result always carries both the draft and the raw
    /// extraction for admin review.
    pub async fn run(&self, request: IngestRequest) -> Result<IngestResponse, PipelineError> {
        self.validate(&request)?;

        let ingest_id = Uuid::new_v4();
        info!(
            target = "torii.api",
            ingest_id = %ingest_id,
            source_url = %request.source_url,
            margin = request.profit_margin,
            "ingest_started"
        );

        let raw = self.acquire(&request.source_url).await;

        let draft = timed(
            "normalize",
            self.normalizer.normalize(&raw, request.profit_margin),
        )
        .await
        .map_err(PipelineError::from_normalization)?;

        let mirrored = timed("mirror_images", self.mirror.mirror(&raw.images)).await;
        let attempted = raw.images.len().min(crate::mirror::MAX_MIRRORED_IMAGES);
        if mirrored.len() < attempted {
            warn!(
                target = "torii.storage",
                ingest_id = %ingest_id,
                attempted,
                mirrored = mirrored.len(),
                "image_mirror_partial"
            );
        }
        let image_urls = if mirrored.is_empty() {
            draft.image_urls.clone()
        } else {
            mirrored.into_iter().map(|image| image.storage_key).collect()
        };

        let product = ProductPayload {
            name: draft.name,
            description: draft.description,
            category: draft.category,
            tags: draft.tags,
            price: draft.price,
            specifications: draft.specifications,
            image_urls,
            stock_status: "in_stock".to_string(),
            source_url: draft.source_url,
            source_price: draft.source_price,
            price_requires_review: draft.price_requires_review,
        };

        info!(
            target = "torii.api",
            ingest_id = %ingest_id,
            price = product.price,
            images = product.image_urls.len(),
            manual_input = raw.manual_input_required,
            "ingest_completed"
        );

        Ok(IngestResponse {
            product,
            original_data: raw,
        })
    }

    /// Fetch, extract and assemble only; the preview endpoint uses this to
    /// show the admin what the heuristics found before a model call is paid
    /// for.
    pub async fn preview(&self, request: &IngestRequest) -> Result<RawExtraction, PipelineError> {
        self.validate(request)?;
        Ok(self.acquire(&request.source_url).await)
    }

    async fn acquire(&self, source_url: &str) -> RawExtraction {
        let outcome = timed("fetch", self.fetcher.fetch(source_url)).await;
        let extracted = match outcome {
            FetchOutcome::Fetched { content, format } => {
                Some(timed("extract", async { self.extractor.extract(&content, format) }).await)
            }
            // Already logged by the fetcher; the assembler owns this path.
            FetchOutcome::Degraded { .. } => None,
        };
        assemble(extracted, source_url)
    }

    fn validate(&self, request: &IngestRequest) -> Result<(), PipelineError> {
        let url = reqwest::Url::parse(request.source_url.trim())
            .map_err(|_| PipelineError::invalid_input("ingest", "invalid_source_url"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::invalid_input(
                "ingest",
                format!("unsupported_url_scheme: {}", url.scheme()),
            ));
        }
        if !(0.0..=self.max_margin).contains(&request.profit_margin) {
            return Err(PipelineError::invalid_input(
                "ingest",
                "profit_margin_out_of_range",
            ));
        }
        Ok(())
    }
}

async fn timed<T, Fut>(name: &'static str, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let started = Instant::now();
    let value = fut.await;
    crate::metrics::stage_elapsed(name, started.elapsed().as_millis());
    value
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    /// The generative stage could not produce a parseable draft; the one
    /// failure worth surfacing, since there is no copy to review without it.
    Normalization,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    #[allow(dead_code)]
    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    fn from_normalization(err: NormalizationError) -> Self {
        Self {
            stage: "normalize",
            message: err.to_string(),
            kind: PipelineErrorKind::Normalization,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::storage::MemoryStore;

    const STUB_DRAFT: &str = r#"{"name":"ワイヤレスドアベルカメラ","description":"玄関の様子をスマホで確認できるドアベルカメラ。","category":"スマートホーム","tags":["防犯","ドアベル","カメラ"],"price":0,"specifications":{}}"#;

    fn offline_pipeline(stub_reply: &str) -> IngestPipeline {
        let config = PipelineConfig {
            fetcher: FetcherConfig::disabled(),
            ..PipelineConfig::default()
        };
        IngestPipeline::new(
            config,
            Arc::new(LlmClient::stubbed(stub_reply)),
            Arc::new(MemoryStore::default()),
        )
    }

    fn request(url: &str, margin: f64) -> IngestRequest {
        IngestRequest {
            source_url: url.to_string(),
            profit_margin: margin,
        }
    }

    #[tokio::test]
    async fn total_fetch_failure_still_returns_a_reviewable_draft() {
        let pipeline = offline_pipeline(STUB_DRAFT);
        let response = pipeline
            .run(request(
                "https://example.com/product-detail/wireless-doorbell-camera_100001",
                50.0,
            ))
            .await
            .expect("degraded fetch is not an error");

        let raw = &response.original_data;
        assert!(raw.title.contains("wireless doorbell camera"));
        assert!(raw.manual_input_required);
        assert_eq!((raw.min_price, raw.max_price), (0.0, 0.0));
        assert!(raw.images.is_empty());

        let product = &response.product;
        assert!(product.price > 0);
        assert!(product.price_requires_review);
        assert_eq!(product.category, Category::SmartHome);
        assert_eq!(product.stock_status, "in_stock");
        assert_eq!(product.source_price, 0.0);
        assert_eq!(
            product.source_url,
            "https://example.com/product-detail/wireless-doorbell-camera_100001"
        );
    }

    #[tokio::test]
    async fn unparseable_model_reply_surfaces_as_normalization_error() {
        let pipeline = offline_pipeline("これはJSONではありません。");
        let err = pipeline
            .run(request("https://example.com/p/widget_1", 100.0))
            .await
            .expect_err("normalization must fail outward");
        assert_eq!(err.kind(), PipelineErrorKind::Normalization);
        assert_eq!(err.stage(), "normalize");
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let pipeline = offline_pipeline(STUB_DRAFT);
        let err = pipeline
            .run(request("ftp://example.com/p/widget_1", 100.0))
            .await
            .expect_err("scheme must be rejected");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn rejects_out_of_range_margin() {
        let pipeline = offline_pipeline(STUB_DRAFT);
        for margin in [-5.0, 5000.0] {
            let err = pipeline
                .run(request("https://example.com/p/widget_1", margin))
                .await
                .expect_err("margin must be rejected");
            assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        }
    }

    #[tokio::test]
    async fn preview_skips_the_generative_stage() {
        // The stub reply is unparseable, so a full run would fail; preview
        // must not care.
        let pipeline = offline_pipeline("not json");
        let raw = pipeline
            .preview(&request("https://example.com/p/smart-plug_42", 100.0))
            .await
            .expect("preview has no model stage");
        assert_eq!(raw.title, "smart plug 42");
        assert!(raw.manual_input_required);
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_interfere() {
        let pipeline = Arc::new(offline_pipeline(STUB_DRAFT));
        let a = pipeline.clone();
        let b = pipeline.clone();
        let (left, right) = tokio::join!(
            a.run(request("https://example.com/p/left-item_1", 50.0)),
            b.run(request("https://example.com/p/right-item_2", 80.0)),
        );
        let left = left.unwrap();
        let right = right.unwrap();
        assert!(left.original_data.title.contains("left item"));
        assert!(right.original_data.title.contains("right item"));
    }
}
