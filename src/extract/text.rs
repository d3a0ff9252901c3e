use super::{Fields, accept_pair, localize_spec_key, strip_marketplace_suffix};

// Reader services reduce a page to plain text: the title surfaces as the
// first meaningful line and the specification table collapses into
// `key: value` lines (ASCII or full-width colon, depending on the locale
// of the source page).

pub(super) fn extract(content: &str) -> Fields {
    let mut lines = content.lines().map(str::trim).filter(|line| !line.is_empty());

    let title = lines
        .next()
        .map(first_line_title)
        .unwrap_or_default();

    let mut specifications = Vec::new();
    for line in lines {
        if let Some((key, value)) = split_pair(line) {
            specifications.push((key, value));
        }
    }

    let description = synthesize_description(&specifications, &title);
    let images = super::markup::extract_images(content);

    Fields {
        title,
        description,
        specifications,
        images,
    }
}

fn first_line_title(line: &str) -> String {
    // Reader preamble: "Title: <page title>".
    let line = line.strip_prefix("Title:").map(str::trim).unwrap_or(line);
    strip_marketplace_suffix(line)
}

fn split_pair(line: &str) -> Option<(String, String)> {
    let (raw_key, raw_value) = line
        .split_once('：')
        .or_else(|| line.split_once(':'))?;
    let value = raw_value.trim();
    // "https://…" splits into a junk pair; URLs are not specifications.
    if value.starts_with("//") || value.contains("://") || raw_key.contains("http") {
        return None;
    }
    let key = localize_spec_key(raw_key);
    if !accept_pair(&key, value) {
        return None;
    }
    Some((key, value.to_string()))
}

fn synthesize_description(pairs: &[(String, String)], title: &str) -> String {
    if pairs.is_empty() {
        return title.to_string();
    }
    pairs
        .iter()
        .take(3)
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Title: Smart Video Doorbell 1080p - Alibaba.com

URL Source: https://example.com/product-detail/doorbell_1001

材质: ABS
颜色：ブラック
Voltage: DC 5V
This long paragraph has no colon and is skipped.
";

    #[test]
    fn first_line_becomes_title_without_suffix() {
        let out = extract(SAMPLE);
        assert_eq!(out.title, "Smart Video Doorbell 1080p");
    }

    #[test]
    fn collects_pairs_with_both_colon_forms() {
        let out = extract(SAMPLE);
        assert!(out.specifications.contains(&("素材".into(), "ABS".into())));
        assert!(
            out.specifications
                .contains(&("カラー".into(), "ブラック".into()))
        );
        assert!(
            out.specifications
                .contains(&("Voltage".into(), "DC 5V".into()))
        );
    }

    #[test]
    fn url_lines_do_not_become_specifications() {
        let out = extract(SAMPLE);
        assert!(out.specifications.iter().all(|(k, _)| !k.contains("URL")));
    }

    #[test]
    fn description_joins_leading_pairs() {
        let out = extract(SAMPLE);
        assert_eq!(out.description, "素材: ABS\nカラー: ブラック\nVoltage: DC 5V");
    }

    #[test]
    fn description_falls_back_to_title() {
        let out = extract("Standalone Product Name\njust prose, nothing tabular");
        assert_eq!(out.description, "Standalone Product Name");
    }

    #[test]
    fn empty_content_yields_empty_fields() {
        let out = extract("");
        assert!(out.title.is_empty());
        assert!(out.specifications.is_empty());
    }
}
