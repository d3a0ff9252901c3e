use super::{Fields, MAX_IMAGES, accept_pair, localize_spec_key, strip_marketplace_suffix};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

// Raw-markup heuristics for the direct-fetch path. Marketplace pages are
// hostile and inconsistent, so every pattern is optional: no match means
// an empty field, never an error.

static H1_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h1[^>]*>\s*([^<]+?)\s*</h1>").expect("h1 pattern"));
static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>\s*([^<]+?)\s*</title>").expect("title pattern"));
static JSON_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""title"\s*:\s*"([^"]+)""#).expect("json title pattern"));
static JSON_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""subject"\s*:\s*"([^"]+)""#).expect("json subject pattern"));

static META_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\s+name="description"\s+content="([^"]*)""#)
        .expect("meta description pattern")
});
static OG_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\s+property="og:description"\s+content="([^"]*)""#)
        .expect("og description pattern")
});

static TABLE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<tr[^>]*>\s*<t[hd][^>]*>\s*([^<]+?)\s*</t[hd]>\s*<td[^>]*>\s*([^<]+?)\s*</td>")
        .expect("table row pattern")
});
static DEFINITION_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<dt[^>]*>\s*([^<]+?)\s*</dt>\s*<dd[^>]*>\s*([^<]+?)\s*</dd>")
        .expect("definition row pattern")
});

static IMAGE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https://[^"'\s<>\\)]+\.(?:jpg|jpeg|png|webp)"#).expect("image url pattern")
});

// Marketplace CDNs that actually serve product shots.
const IMAGE_HOST_ALLOWLIST: &[&str] = &["img.alibaba.com", "alicdn.com"];
// Assets that are never the product.
const IMAGE_DENYLIST: &[&str] = &["logo", "icon", "avatar", "sprite"];

const TITLE_PATTERNS: &[fn(&str) -> Option<String>] = &[
    |content| title_from(&H1_TAG, content),
    |content| title_from(&TITLE_TAG, content),
    |content| title_from(&JSON_TITLE, content),
    |content| title_from(&JSON_SUBJECT, content),
];

pub(super) fn extract(content: &str) -> Fields {
    let title = TITLE_PATTERNS
        .iter()
        .find_map(|pattern| pattern(content))
        .unwrap_or_default();

    let description = META_DESCRIPTION
        .captures(content)
        .or_else(|| OG_DESCRIPTION.captures(content))
        .and_then(|captures| captures.get(1))
        .map(|m| decode_entities(m.as_str()).trim().to_string())
        .unwrap_or_default();

    let specifications = extract_pairs(content);
    let images = extract_images(content);

    Fields {
        title,
        description,
        specifications,
        images,
    }
}

fn title_from(regex: &Regex, content: &str) -> Option<String> {
    let raw = regex.captures(content)?.get(1)?.as_str();
    let candidate = strip_marketplace_suffix(decode_entities(raw).trim());
    // Anything this short is a nav crumb or site name, not a product title.
    (candidate.chars().count() > 5).then_some(candidate)
}

fn extract_pairs(content: &str) -> Vec<(String, String)> {
    let mut pairs = pairs_from(&TABLE_ROW, content);
    if pairs.is_empty() {
        pairs = pairs_from(&DEFINITION_ROW, content);
    }
    pairs
}

fn pairs_from(regex: &Regex, content: &str) -> Vec<(String, String)> {
    regex
        .captures_iter(content)
        .filter_map(|captures| {
            let key = localize_spec_key(&decode_entities(captures.get(1)?.as_str()));
            let value = decode_entities(captures.get(2)?.as_str()).trim().to_string();
            accept_pair(&key, &value).then_some((key, value))
        })
        .collect()
}

/// Candidate product-image URLs: CDN-hosted, not an obvious site asset,
/// de-duplicated in first-seen order, capped.
pub(super) fn extract_images(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for found in IMAGE_URL.find_iter(content) {
        let url = found.as_str();
        if !host_allowed(url) || denied(url) {
            continue;
        }
        if seen.insert(url.to_string()) {
            images.push(url.to_string());
            if images.len() == MAX_IMAGES {
                break;
            }
        }
    }
    images
}

fn host_allowed(url: &str) -> bool {
    let host = url
        .strip_prefix("https://")
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("");
    IMAGE_HOST_ALLOWLIST
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
}

fn denied(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    IMAGE_DENYLIST.iter().any(|word| lower.contains(word))
}

pub(super) fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';').filter(|end| *end <= 8) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            "nbsp" => out.push(' '),
            _ => {
                let decoded = entity
                    .strip_prefix('#')
                    .and_then(|digits| digits.parse::<u32>().ok())
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('&');
                        rest = &rest[1..];
                        continue;
                    }
                }
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
<title>Smart Doorbell Camera 2K &amp; Chime - Alibaba.com</title>
<meta name="description" content="Battery powered doorbell, two-way audio &amp; night vision">
</head><body>
<h1> Smart Doorbell Camera 2K </h1>
<table>
<tr><th>材质</th><td>ABS</td></tr>
<tr><td>颜色</td><td>Black &amp; White</td></tr>
<tr><td></td><td>empty key dropped</td></tr>
</table>
<img src="https://sc04.alicdn.com/kf/doorbell-front.jpg">
<img src="https://sc04.alicdn.com/kf/doorbell-front.jpg">
<img src="https://sc04.alicdn.com/kf/site-logo.png">
<img src="https://cdn.other.com/photo.jpg">
<img src="https://img.alibaba.com/p/doorbell-side.png">
</body></html>"#;

    #[test]
    fn h1_outranks_title_tag() {
        let out = extract(PAGE);
        assert_eq!(out.title, "Smart Doorbell Camera 2K");
    }

    #[test]
    fn title_tag_used_when_h1_missing() {
        let page = PAGE.replace("<h1> Smart Doorbell Camera 2K </h1>", "");
        let out = extract(&page);
        assert_eq!(out.title, "Smart Doorbell Camera 2K & Chime");
    }

    #[test]
    fn short_title_candidates_are_skipped() {
        let page = "<h1>Cam</h1><title>Smart Doorbell Camera 2K</title>";
        let out = extract(page);
        assert_eq!(out.title, "Smart Doorbell Camera 2K");
    }

    #[test]
    fn meta_description_is_decoded() {
        let out = extract(PAGE);
        assert_eq!(
            out.description,
            "Battery powered doorbell, two-way audio & night vision"
        );
    }

    #[test]
    fn table_pairs_are_localized_and_bounded() {
        let out = extract(PAGE);
        assert!(out.specifications.contains(&("素材".into(), "ABS".into())));
        assert!(
            out.specifications
                .contains(&("カラー".into(), "Black & White".into()))
        );
        assert_eq!(out.specifications.len(), 2);
    }

    #[test]
    fn images_filtered_deduplicated_and_ordered() {
        let out = extract(PAGE);
        assert_eq!(
            out.images,
            vec![
                "https://sc04.alicdn.com/kf/doorbell-front.jpg".to_string(),
                "https://img.alibaba.com/p/doorbell-side.png".to_string(),
            ]
        );
    }

    #[test]
    fn image_cap_is_enforced() {
        let mut page = String::new();
        for i in 0..8 {
            page.push_str(&format!(
                "<img src=\"https://sc04.alicdn.com/kf/item-{i}.jpg\">"
            ));
        }
        assert_eq!(extract_images(&page).len(), MAX_IMAGES);
    }

    #[test]
    fn malformed_markup_extracts_nothing() {
        let out = extract("<<<<not really html &unterminated");
        assert!(out.title.is_empty());
        assert!(out.specifications.is_empty());
        assert!(out.images.is_empty());
    }

    #[test]
    fn decode_entities_handles_numeric_and_unknown() {
        assert_eq!(decode_entities("a &#38; b"), "a & b");
        assert_eq!(decode_entities("5 &lt; 6"), "5 < 6");
        assert_eq!(decode_entities("AT&T &bogusname; x"), "AT&T &bogusname; x");
    }
}
