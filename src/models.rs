use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub source_url: String,
    #[serde(default = "default_margin")]
    pub profit_margin: f64,
}

fn default_margin() -> f64 {
    100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub product: ProductPayload,
    #[serde(rename = "originalData")]
    pub original_data: RawExtraction,
}

/// Store-ready product record handed back for admin review. Never
/// persisted by the pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPayload {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub price: i64,
    pub specifications: BTreeMap<String, String>,
    pub image_urls: Vec<String>,
    pub stock_status: String,
    pub source_url: String,
    pub source_price: f64,
    #[serde(default)]
    pub price_requires_review: bool,
}

/// What the heuristics recovered from the source page, kept alongside the
/// normalized draft so the admin can audit the model's rewrite.
///
/// Absent data is an empty string / zero / empty collection, never a
/// missing field: the model prompt and the admin UI both rely on every
/// key being present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtraction {
    pub title: String,
    pub description: String,
    pub min_price: f64,
    pub max_price: f64,
    pub images: Vec<String>,
    pub specifications: BTreeMap<String, String>,
    pub source_url: String,
    pub manual_input_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Category {
    #[default]
    #[serde(rename = "personal")]
    Personal,
    #[serde(rename = "smart-home")]
    SmartHome,
    #[serde(rename = "vehicle")]
    Vehicle,
}

impl Category {
    pub fn label_ja(&self) -> &'static str {
        match self {
            Category::Personal => "個人向け",
            Category::SmartHome => "スマートホーム",
            Category::Vehicle => "車両・バイク",
        }
    }

    /// Accepts both the Japanese labels the model echoes back and the wire
    /// slugs. Anything else is the caller's cue to fall back to the default.
    pub fn from_model(input: &str) -> Option<Self> {
        match input.trim() {
            "個人向け" | "personal" => Some(Category::Personal),
            "スマートホーム" | "smart-home" | "smart_home" | "smart home" => {
                Some(Category::SmartHome)
            }
            "車両・バイク" | "車両" | "バイク" | "vehicle" => Some(Category::Vehicle),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_japanese_and_slug_forms() {
        assert_eq!(Category::from_model("個人向け"), Some(Category::Personal));
        assert_eq!(
            Category::from_model(" スマートホーム "),
            Some(Category::SmartHome)
        );
        assert_eq!(Category::from_model("vehicle"), Some(Category::Vehicle));
        assert_eq!(Category::from_model("家電"), None);
    }

    #[test]
    fn category_serializes_to_wire_slugs() {
        assert_eq!(
            serde_json::to_string(&Category::SmartHome).unwrap(),
            "\"smart-home\""
        );
    }

    #[test]
    fn ingest_request_defaults_margin() {
        let req: IngestRequest =
            serde_json::from_str(r#"{"source_url":"https://example.com/p/1"}"#).unwrap();
        assert_eq!(req.profit_margin, 100.0);
    }

    #[test]
    fn raw_extraction_uses_camel_case_keys() {
        let raw = RawExtraction {
            title: "t".into(),
            description: "d".into(),
            min_price: 1.0,
            max_price: 2.0,
            images: vec![],
            specifications: BTreeMap::new(),
            source_url: "https://example.com".into(),
            manual_input_required: true,
        };
        let json = serde_json::to_value(&raw).unwrap();
        assert!(json.get("minPrice").is_some());
        assert!(json.get("manualInputRequired").is_some());
        assert!(json.get("sourceUrl").is_some());
    }
}
