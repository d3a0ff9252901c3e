use once_cell::sync::Lazy;
use regex::Regex;

/// Fixed conversion rates for price normalization. The extractor settles
/// everything into USD (the reference currency); the sale-price formula
/// downstream converts the reference into yen.
#[derive(Debug, Clone, Copy)]
pub struct FxConfig {
    pub usd_jpy: f64,
    pub cny_usd: f64,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            usd_jpy: 150.0,
            cny_usd: 0.14,
        }
    }
}

impl FxConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            usd_jpy: rate_from_env("FX_USD_JPY", defaults.usd_jpy),
            cny_usd: rate_from_env("FX_CNY_USD", defaults.cny_usd),
        }
    }
}

fn rate_from_env(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceCurrency {
    Usd,
    Cny,
}

type PriceMatch = (f64, f64, PriceCurrency);

const AMOUNT: &str = r"([0-9][0-9,]*(?:\.[0-9]+)?)";

static USD_TAGGED_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)US\s*\$\s*{AMOUNT}\s*-\s*US\s*\$\s*{AMOUNT}"
    ))
    .expect("usd tagged range pattern")
});

static BARE_SYMBOL_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\$\s*{AMOUNT}\s*-\s*\$\s*{AMOUNT}")).expect("bare range pattern")
});

static LOCAL_SYMBOL_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"[¥￥]\s*{AMOUNT}\s*-\s*[¥￥]\s*{AMOUNT}"))
        .expect("local range pattern")
});

static SINGLE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)(?:US\s*)?\$\s*{AMOUNT}")).expect("single pattern"));

// Ordered cascade: the first matcher that fires wins, patterns are never
// combined. Each matcher is a pure function so it unit-tests on its own.
const PATTERNS: &[fn(&str) -> Option<PriceMatch>] = &[
    match_usd_tagged_range,
    match_bare_symbol_range,
    match_local_symbol_range,
    match_single_amount,
];

/// Scans `content` for a currency-tagged price range and normalizes it to
/// the reference currency. `(0.0, 0.0)` means no parseable price, which is
/// a valid result, not an error.
pub fn extract_price(content: &str, fx: &FxConfig) -> (f64, f64) {
    for pattern in PATTERNS {
        if let Some((lo, hi, currency)) = pattern(content) {
            let rate = match currency {
                PriceCurrency::Usd => 1.0,
                PriceCurrency::Cny => fx.cny_usd,
            };
            let (lo, hi) = (lo * rate, hi * rate);
            return if lo <= hi { (lo, hi) } else { (hi, lo) };
        }
    }
    (0.0, 0.0)
}

fn match_usd_tagged_range(content: &str) -> Option<PriceMatch> {
    range_match(&USD_TAGGED_RANGE, content, PriceCurrency::Usd)
}

fn match_bare_symbol_range(content: &str) -> Option<PriceMatch> {
    range_match(&BARE_SYMBOL_RANGE, content, PriceCurrency::Usd)
}

fn match_local_symbol_range(content: &str) -> Option<PriceMatch> {
    range_match(&LOCAL_SYMBOL_RANGE, content, PriceCurrency::Cny)
}

fn match_single_amount(content: &str) -> Option<PriceMatch> {
    let captures = SINGLE_AMOUNT.captures(content)?;
    let amount = parse_amount(captures.get(1)?.as_str())?;
    Some((amount, amount, PriceCurrency::Usd))
}

fn range_match(regex: &Regex, content: &str, currency: PriceCurrency) -> Option<PriceMatch> {
    let captures = regex.captures(content)?;
    let lo = parse_amount(captures.get(1)?.as_str())?;
    let hi = parse_amount(captures.get(2)?.as_str())?;
    Some((lo, hi, currency))
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx() -> FxConfig {
        FxConfig::default()
    }

    #[test]
    fn parses_usd_tagged_range() {
        let (lo, hi) = extract_price("価格 US $12.50 - US $18.00 / ピース", &fx());
        assert_eq!((lo, hi), (12.50, 18.00));
    }

    #[test]
    fn parses_bare_symbol_range() {
        let (lo, hi) = extract_price("now $1,299 - $1,899 each", &fx());
        assert_eq!((lo, hi), (1299.0, 1899.0));
    }

    #[test]
    fn converts_local_currency_range_to_reference() {
        let custom = FxConfig {
            usd_jpy: 150.0,
            cny_usd: 0.15,
        };
        let (lo, hi) = extract_price("¥100 - ¥200", &custom);
        assert!((lo - 15.0).abs() < 1e-9);
        assert!((hi - 30.0).abs() < 1e-9);
    }

    #[test]
    fn single_amount_fills_both_bounds() {
        let (lo, hi) = extract_price("only US $9.99 today", &fx());
        assert_eq!((lo, hi), (9.99, 9.99));
    }

    #[test]
    fn first_matching_pattern_wins() {
        // Tagged range outranks the single-amount pattern even though both match.
        let (lo, hi) = extract_price("US $5 - US $7, was $12", &fx());
        assert_eq!((lo, hi), (5.0, 7.0));
    }

    #[test]
    fn no_price_yields_zero_bounds() {
        assert_eq!(extract_price("no numbers with currency here", &fx()), (0.0, 0.0));
        assert_eq!(extract_price("", &fx()), (0.0, 0.0));
    }

    #[test]
    fn inverted_bounds_are_swapped() {
        let (lo, hi) = extract_price("US $18.00 - US $12.50", &fx());
        assert_eq!((lo, hi), (12.50, 18.00));
    }
}
