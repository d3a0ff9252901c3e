use crate::llm::{LlmClient, LlmError, LlmMessage};
use crate::models::{Category, RawExtraction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

const SYSTEM_PROMPT: &str = r#"
あなたは日本のECサイト向けの商品情報最適化の専門家です。海外マーケットプレイスの
商品情報を受け取り、日本の購入者向けに最適化した商品ドラフトを作成します。
応答は必ず単一のJSONオブジェクトのみとし、前後に説明文やコードフェンスを付けないでください。
"#;

const DEFAULT_TAGS: &[&str] = &["輸入品", "新着", "おすすめ"];
const MIN_TAGS: usize = 3;
const MAX_TAGS: usize = 5;

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("model request failed: {0}")]
    Gateway(#[from] LlmError),
    #[error("model reply was not a single product object: {raw}")]
    Parse { raw: String },
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Reference-currency to yen conversion applied by the price formula.
    pub usd_jpy: f64,
    /// Display-friendly pricing: round to this many yen.
    pub rounding_unit: i64,
    /// Display limit for the product name, in characters.
    pub name_limit: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            usd_jpy: 150.0,
            rounding_unit: 100,
            name_limit: 30,
        }
    }
}

/// Normalized draft handed back to the caller for review; nothing here is
/// persisted by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub price: i64,
    pub specifications: BTreeMap<String, String>,
    pub source_url: String,
    pub source_price: f64,
    pub image_urls: Vec<String>,
    pub price_requires_review: bool,
}

/// Everything the model returns is optional on the wire; `repair` turns it
/// into a total `ProductDraft` immediately after decode.
#[derive(Debug, Default, Deserialize)]
struct ModelReply {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    specifications: Option<BTreeMap<String, String>>,
}

pub struct ProductNormalizer {
    llm: Arc<LlmClient>,
    config: NormalizerConfig,
}

impl ProductNormalizer {
    pub fn new(llm: Arc<LlmClient>, config: NormalizerConfig) -> Self {
        Self { llm, config }
    }

    pub async fn normalize(
        &self,
        extraction: &RawExtraction,
        margin_percent: f64,
    ) -> Result<ProductDraft, NormalizationError> {
        let messages = [
            LlmMessage {
                role: "system".into(),
                content: SYSTEM_PROMPT.trim().to_string(),
            },
            LlmMessage {
                role: "user".into(),
                content: self.build_prompt(extraction, margin_percent),
            },
        ];

        let response = self.llm.chat(&messages).await?;
        let reply = parse_model_reply(&response.text)?;
        Ok(repair(reply, extraction, margin_percent, &self.config))
    }

    fn build_prompt(&self, extraction: &RawExtraction, margin_percent: f64) -> String {
        let specifications = if extraction.specifications.is_empty() {
            "（なし）".to_string()
        } else {
            extraction
                .specifications
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"以下の商品情報を分析し、日本のECサイト用に最適化してください。

【元の商品情報】
商品名: {title}
商品説明: {description}
価格範囲: ${min_price} - ${max_price}
マージン率: {margin}%
仕様:
{specifications}

【出力形式】
次のキーを持つJSONオブジェクトのみを出力してください:
{{
  "name": "日本語の商品名（{name_limit}文字以内、魅力的に）",
  "description": "日本語の商品説明（100-200文字、ベネフィット重視）",
  "category": "個人向け、スマートホーム、車両・バイク のいずれか",
  "tags": ["タグ1", "タグ2", "タグ3"],
  "price": 販売価格（円、整数）,
  "specifications": {{ "主要スペック": "値" }}
}}

【価格計算ルール】
- 元の価格（ドル）を円に換算（1ドル={rate}円）
- マージン率を適用: 販売価格 = 仕入れ価格 × (1 + マージン率/100)
- 最終価格は{unit}円単位で丸める"#,
            title = extraction.title,
            description = extraction.description,
            min_price = extraction.min_price,
            max_price = extraction.max_price,
            margin = margin_percent,
            specifications = specifications,
            name_limit = self.config.name_limit,
            rate = self.config.usd_jpy,
            unit = self.config.rounding_unit,
        )
    }
}

fn parse_model_reply(text: &str) -> Result<ModelReply, NormalizationError> {
    let cleaned = strip_markdown_fence(text);
    if let Ok(reply) = serde_json::from_str::<ModelReply>(&cleaned) {
        return Ok(reply);
    }
    // Models wrap the object in prose or fences despite instructions;
    // recover the first embedded object before giving up.
    if let Some(embedded) = extract_embedded_object(text)
        && let Ok(reply) = serde_json::from_str::<ModelReply>(embedded)
    {
        return Ok(reply);
    }
    Err(NormalizationError::Parse {
        raw: truncate_chars(text.trim(), 300),
    })
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

fn extract_embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Post-parse validation and defaulting: the model is never trusted for
/// completeness, and never authoritative for provenance.
fn repair(
    reply: ModelReply,
    extraction: &RawExtraction,
    margin_percent: f64,
    config: &NormalizerConfig,
) -> ProductDraft {
    let name = reply
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| extraction.title.clone());
    let name = truncate_chars(&name, config.name_limit);

    let description = reply
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| extraction.description.clone());

    let category = reply
        .category
        .as_deref()
        .and_then(Category::from_model)
        .unwrap_or_default();

    let tags = repair_tags(reply.tags.unwrap_or_default());

    let (price, price_requires_review) = match reply.price {
        Some(price) if price > 0.0 => (price.round() as i64, false),
        _ => {
            let computed = compute_sale_price(extraction.min_price, margin_percent, config);
            if computed > 0 {
                (computed, false)
            } else {
                // Source price was unrecoverable: clamp to one rounding
                // unit and make the admin set a real price.
                warn!(
                    target = "torii.llm",
                    source_url = %extraction.source_url,
                    "sale_price_requires_manual_review"
                );
                (config.rounding_unit, true)
            }
        }
    };

    let specifications = reply
        .specifications
        .filter(|map| !map.is_empty())
        .unwrap_or_else(|| extraction.specifications.clone());

    ProductDraft {
        name,
        description,
        category,
        tags,
        price,
        specifications,
        source_url: extraction.source_url.clone(),
        source_price: extraction.min_price,
        image_urls: extraction.images.clone(),
        price_requires_review,
    }
}

fn repair_tags(raw: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    for default in DEFAULT_TAGS {
        if tags.len() >= MIN_TAGS {
            break;
        }
        if !tags.iter().any(|t| t == default) {
            tags.push((*default).to_string());
        }
    }
    tags
}

/// The deterministic formula the model is instructed to apply; recomputed
/// here whenever its answer is missing or non-positive.
pub fn compute_sale_price(min_usd: f64, margin_percent: f64, config: &NormalizerConfig) -> i64 {
    let yen = min_usd * config.usd_jpy * (1.0 + margin_percent / 100.0);
    let unit = config.rounding_unit as f64;
    ((yen / unit).round() * unit) as i64
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}
