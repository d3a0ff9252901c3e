use crate::http::{build_browser_client, build_client};
use reqwest::Client;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    /// Page reduced to clean text by the reader service.
    ReducedText,
    /// Raw HTML from a direct fetch.
    RawMarkup,
}

/// Degradation is the designed path, not a failure: the caller must keep
/// going with a URL-derived draft when acquisition comes back `Degraded`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched {
        content: String,
        format: ContentFormat,
    },
    Degraded {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Base URL of the page-to-text reduction service; `None` disables the
    /// reader strategy.
    pub reader_base_url: Option<String>,
    pub reader_api_key: Option<String>,
    pub direct_enabled: bool,
    /// Anything shorter is a bot wall or an empty shell, not a product page.
    pub min_content_len: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            reader_base_url: Some("https://r.jina.ai".to_string()),
            reader_api_key: None,
            direct_enabled: true,
            min_content_len: 300,
        }
    }
}

impl FetcherConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let reader_base_url = match std::env::var("READER_BASE_URL") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value.trim_end_matches('/').to_string()),
            Err(_) => defaults.reader_base_url,
        };
        Self {
            reader_base_url,
            reader_api_key: std::env::var("READER_API_KEY").ok(),
            direct_enabled: !flag_from_env("FETCH_DISABLE_DIRECT"),
            min_content_len: std::env::var("FETCH_MIN_CONTENT_LEN")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.min_content_len),
        }
    }

    /// Both strategies off; tests and air-gapped runs use this to exercise
    /// the degraded path deterministically.
    pub fn disabled() -> Self {
        Self {
            reader_base_url: None,
            reader_api_key: None,
            direct_enabled: false,
            min_content_len: Self::default().min_content_len,
        }
    }
}

fn flag_from_env(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

pub struct ContentFetcher {
    config: FetcherConfig,
    reader_http: Client,
    direct_http: Client,
}

impl ContentFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            reader_http: build_client(),
            direct_http: build_browser_client(),
        }
    }

    /// Ordered strategies, one attempt each, no backoff: this backs an
    /// interactive admin action, so fail fast and fall through.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let mut reasons = Vec::new();

        match self.fetch_via_reader(url).await {
            Ok(content) => {
                debug!(target = "torii.fetch", url, len = content.len(), "reader_strategy_hit");
                return FetchOutcome::Fetched {
                    content,
                    format: ContentFormat::ReducedText,
                };
            }
            Err(reason) => reasons.push(format!("reader: {reason}")),
        }

        match self.fetch_direct(url).await {
            Ok(content) => {
                debug!(target = "torii.fetch", url, len = content.len(), "direct_strategy_hit");
                return FetchOutcome::Fetched {
                    content,
                    format: ContentFormat::RawMarkup,
                };
            }
            Err(reason) => reasons.push(format!("direct: {reason}")),
        }

        let reason = reasons.join("; ");
        warn!(target = "torii.fetch", url, reason, "content_acquisition_degraded");
        FetchOutcome::Degraded { reason }
    }

    async fn fetch_via_reader(&self, url: &str) -> Result<String, String> {
        let Some(base) = &self.config.reader_base_url else {
            return Err("strategy disabled".into());
        };
        let mut request = self.reader_http.get(format!("{base}/{url}"));
        if let Some(key) = &self.config.reader_api_key {
            request = request.bearer_auth(key);
        }
        self.issue(request).await
    }

    async fn fetch_direct(&self, url: &str) -> Result<String, String> {
        if !self.config.direct_enabled {
            return Err("strategy disabled".into());
        }
        self.issue(self.direct_http.get(url)).await
    }

    async fn issue(&self, request: reqwest::RequestBuilder) -> Result<String, String> {
        let response = request.send().await.map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        let content = response.text().await.map_err(|err| err.to_string())?;
        if content.len() < self.config.min_content_len {
            return Err(format!(
                "content too short ({} < {})",
                content.len(),
                self.config.min_content_len
            ));
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_strategies_degrade_with_reasons() {
        let fetcher = ContentFetcher::new(FetcherConfig::disabled());
        match fetcher.fetch("https://example.com/product-detail/x_1").await {
            FetchOutcome::Degraded { reason } => {
                assert!(reason.contains("reader"));
                assert!(reason.contains("direct"));
            }
            FetchOutcome::Fetched { .. } => panic!("expected degraded outcome"),
        }
    }

    #[test]
    fn default_config_enables_both_strategies() {
        let config = FetcherConfig::default();
        assert!(config.reader_base_url.is_some());
        assert!(config.direct_enabled);
        assert!(config.min_content_len > 0);
    }
}
