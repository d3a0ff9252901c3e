mod markup;
mod price;
mod text;

pub use price::{FxConfig, extract_price};

use crate::fetch::ContentFormat;
use std::collections::BTreeMap;

/// Best-effort fields recovered from one page. Everything may be empty;
/// the assembler owns the fallbacks.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub title: String,
    pub description: String,
    pub min_price: f64,
    pub max_price: f64,
    pub images: Vec<String>,
    pub specifications: BTreeMap<String, String>,
}

pub const MAX_IMAGES: usize = 5;
pub(super) const MAX_SPEC_KEY_CHARS: usize = 50;
pub(super) const MAX_SPEC_VALUE_CHARS: usize = 200;

pub struct FieldExtractor {
    fx: FxConfig,
}

impl FieldExtractor {
    pub fn new(fx: FxConfig) -> Self {
        Self { fx }
    }

    /// Format-aware extraction. Never fails: a pattern that does not match
    /// simply leaves its field empty.
    pub fn extract(&self, content: &str, format: ContentFormat) -> Extracted {
        let fields = match format {
            ContentFormat::ReducedText => text::extract(content),
            ContentFormat::RawMarkup => markup::extract(content),
        };
        let (min_price, max_price) = price::extract_price(content, &self.fx);

        let mut specifications = BTreeMap::new();
        for (key, value) in fields.specifications {
            specifications.entry(key).or_insert(value);
        }

        Extracted {
            title: fields.title,
            description: fields.description,
            min_price,
            max_price,
            images: fields.images,
            specifications,
        }
    }
}

pub(super) struct Fields {
    pub title: String,
    pub description: String,
    pub specifications: Vec<(String, String)>,
    pub images: Vec<String>,
}

/// Marketplace pages suffix their titles with the site name; the suffix is
/// noise for a store-facing product name.
pub(super) fn strip_marketplace_suffix(title: &str) -> String {
    let trimmed = title.trim();
    for separator in [" - ", " | ", " – "] {
        if let Some(pos) = trimmed.rfind(separator) {
            let tail = trimmed[pos + separator.len()..].trim();
            if tail.to_ascii_lowercase().contains("alibaba") {
                return trimmed[..pos].trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

pub(super) fn accept_pair(key: &str, value: &str) -> bool {
    let key_len = key.chars().count();
    let value_len = value.chars().count();
    key_len > 0
        && key_len <= MAX_SPEC_KEY_CHARS
        && value_len > 0
        && value_len <= MAX_SPEC_VALUE_CHARS
}

// Source pages routinely label specifications in Chinese; the store copy is
// Japanese. Extend here, not in the extraction control flow.
const SPEC_KEY_JA: &[(&str, &str)] = &[
    ("材质", "素材"),
    ("颜色", "カラー"),
    ("尺寸", "サイズ"),
    ("重量", "重量"),
    ("品牌", "ブランド"),
    ("型号", "型番"),
    ("产地", "原産地"),
    ("功率", "消費電力"),
    ("电压", "電圧"),
    ("包装", "パッケージ"),
];

pub(super) fn localize_spec_key(key: &str) -> String {
    let trimmed = key.trim();
    SPEC_KEY_JA
        .iter()
        .find(|(from, _)| *from == trimmed)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_site_suffix_variants() {
        assert_eq!(
            strip_marketplace_suffix("Wireless Doorbell Camera - Alibaba.com"),
            "Wireless Doorbell Camera"
        );
        assert_eq!(
            strip_marketplace_suffix("Smart Lock | Buy on Alibaba"),
            "Smart Lock"
        );
        assert_eq!(
            strip_marketplace_suffix("Dash Cam - 1080p Night Vision"),
            "Dash Cam - 1080p Night Vision"
        );
    }

    #[test]
    fn localizes_known_chinese_keys() {
        assert_eq!(localize_spec_key("材质"), "素材");
        assert_eq!(localize_spec_key(" 颜色 "), "カラー");
        assert_eq!(localize_spec_key("Bluetooth"), "Bluetooth");
    }

    #[test]
    fn rejects_out_of_bounds_pairs() {
        assert!(accept_pair("素材", "ABS樹脂"));
        assert!(!accept_pair("", "value"));
        assert!(!accept_pair("key", ""));
        assert!(!accept_pair(&"k".repeat(51), "value"));
        assert!(!accept_pair("key", &"v".repeat(201)));
    }

    #[test]
    fn duplicate_spec_keys_keep_first_value() {
        let extractor = FieldExtractor::new(FxConfig::default());
        let content = "Smart Sensor Hub\n材质: ABS\n材质: PVC\n";
        let out = extractor.extract(content, ContentFormat::ReducedText);
        assert_eq!(out.specifications.get("素材").map(String::as_str), Some("ABS"));
    }
}
