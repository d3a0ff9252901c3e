use crate::extract::Extracted;
use crate::models::RawExtraction;
use tracing::warn;

const MIN_TITLE_CHARS: usize = 5;
const MIN_DESCRIPTION_CHARS: usize = 10;

/// Total assembly: whatever the fetch and extraction produced (including
/// nothing at all), the result satisfies every `RawExtraction` invariant.
/// `extracted: None` means content acquisition itself failed.
pub fn assemble(extracted: Option<Extracted>, source_url: &str) -> RawExtraction {
    let Some(extracted) = extracted else {
        let title = slug_title(source_url);
        return RawExtraction {
            description: title.clone(),
            title,
            min_price: 0.0,
            max_price: 0.0,
            images: Vec::new(),
            specifications: Default::default(),
            source_url: source_url.to_string(),
            manual_input_required: true,
        };
    };

    let mut title = extracted.title.trim().to_string();
    if title.chars().count() < MIN_TITLE_CHARS {
        title = slug_title(source_url);
        warn!(
            target = "torii.extract",
            source_url, "title_fallback_from_url"
        );
    }

    let mut description = extracted.description.trim().to_string();
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        description = title.clone();
    }

    RawExtraction {
        title,
        description,
        min_price: extracted.min_price,
        max_price: extracted.max_price,
        images: extracted.images,
        specifications: extracted.specifications,
        source_url: source_url.to_string(),
        manual_input_required: false,
    }
}

/// Deterministic human-readable title from the last path segment of the
/// source URL, separators flattened to spaces.
fn slug_title(source_url: &str) -> String {
    let path = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url)
        .trim_end_matches('/');
    let segment = path
        .rsplit('/')
        .find(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("");
    let segment = segment
        .trim_end_matches(".html")
        .trim_end_matches(".htm");

    let words = segment
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if words.trim().is_empty() {
        "imported product".to_string()
    } else {
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extracted;

    #[test]
    fn degraded_fetch_produces_minimal_record() {
        let url = "https://example.com/product-detail/wireless-doorbell-camera_100001";
        let raw = assemble(None, url);
        assert!(raw.title.contains("wireless doorbell camera"));
        assert_eq!(raw.description, raw.title);
        assert_eq!((raw.min_price, raw.max_price), (0.0, 0.0));
        assert!(raw.images.is_empty());
        assert!(raw.specifications.is_empty());
        assert!(raw.manual_input_required);
        assert_eq!(raw.source_url, url);
    }

    #[test]
    fn slug_is_deterministic() {
        let url = "https://example.com/p/smart-lock_77.html";
        assert_eq!(slug_title(url), slug_title(url));
        assert_eq!(slug_title(url), "smart lock 77");
    }

    #[test]
    fn slug_survives_hostile_urls() {
        assert_eq!(slug_title("https://example.com/"), "example.com");
        assert_eq!(slug_title("https://example.com"), "example.com");
        assert_eq!(slug_title(""), "imported product");
        assert_eq!(slug_title("https:///"), "imported product");
    }

    #[test]
    fn short_extracted_title_falls_back_to_slug() {
        let extracted = Extracted {
            title: "Cam".into(),
            description: "A very complete description of the camera.".into(),
            ..Extracted::default()
        };
        let raw = assemble(Some(extracted), "https://example.com/p/outdoor-camera_5");
        assert_eq!(raw.title, "outdoor camera 5");
        assert!(!raw.manual_input_required);
    }

    #[test]
    fn short_description_falls_back_to_title() {
        let extracted = Extracted {
            title: "Outdoor Security Camera".into(),
            description: "short".into(),
            ..Extracted::default()
        };
        let raw = assemble(Some(extracted), "https://example.com/p/x_1");
        assert_eq!(raw.description, "Outdoor Security Camera");
    }

    #[test]
    fn sparse_fields_are_not_manual_input() {
        let extracted = Extracted {
            title: "Outdoor Security Camera".into(),
            description: "Weatherproof camera with night vision.".into(),
            ..Extracted::default()
        };
        let raw = assemble(Some(extracted), "https://example.com/p/x_1");
        assert!(!raw.manual_input_required);
        assert_eq!((raw.min_price, raw.max_price), (0.0, 0.0));
    }
}
