// 🧹 Field Normalizer - prices, dates, noise lines
//
// Everything here is a pure function of its input. The regex tables are
// compiled once and never mutated.

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

/// Default ceiling for a single price and for a receipt total (exclusive)
pub const DEFAULT_PRICE_CEILING: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Default ceiling for items read from auxiliary sections (inclusive)
pub const DEFAULT_LINE_ITEM_CEILING: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

// ============================================================================
// PATTERN TABLES
// ============================================================================

/// Lines that look like receipt header/footer text rather than purchases.
/// Matched against the lowercased, trimmed text.
const NOISE_PATTERNS: &[&str] = &[
    // Address lines
    r"^\d+\s+\w+\s+(st|street|rd|road|ave|avenue|blvd|dr|drive)\b",
    r"^\w+,\s*(ca|ny|tx|fl)\b",
    r"ca\.\s*\d{5}",
    r"^\d{5}$",
    // Phone numbers
    r"\btel[:.\s]",
    r"phone",
    r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
    // Staff / table / order metadata
    r"^server[:\s]",
    r"^cashier[:\s]",
    r"^waiter\s+\d+",
    r"^table\s+\d+",
    r"^order\s*#",
    r"^check\s*#",
    r"^guest",
    r"^reg\s*$",
    r"^qty.*name",
    r"^serv\.?charge",
    // Footer boilerplate
    r"^reprint",
    r"^for a chance",
    r"^see back",
    r"^p\s*a\s*i\s*d\b",
    r"^thank\s*you",
    r"^vielen\s+dank",
    r"^merci\b",
];

fn noise_table() -> &'static [Regex] {
    static TABLE: OnceLock<Vec<Regex>> = OnceLock::new();
    TABLE.get_or_init(|| {
        NOISE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("noise pattern is a valid regex"))
            .collect()
    })
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\D)(\d{1,2}[-/]\d{1,2}[-/](?:\d{4}|\d{2}))(?:\D|$)")
            .expect("date pattern is a valid regex")
    })
}

/// "March 3, 2019" style text that the model sometimes files as an item name
fn date_text_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+\s+\d{1,2},\s*\d{4}").expect("date text pattern is a valid regex"))
}

fn currency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[$€£¥]|\b(?:sfr|fr)\.|\b(?:chf|eur|usd|gbp)\b")
            .expect("currency pattern is a valid regex")
    })
}

// ============================================================================
// PRICES
// ============================================================================

/// Parse a price string into a decimal.
///
/// Both `,` and `.` present: whichever comes last is the decimal separator.
/// Only `,` present: it is the decimal separator (`12,50`).
/// If the whole text does not parse, each whitespace token is tried in turn,
/// which recovers doubled values like `"77.83 77.83"`.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let stripped = currency_regex().replace_all(text, "");

    let compact: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(value) = parse_number(&compact) {
        return Some(value);
    }

    stripped.split_whitespace().find_map(parse_number)
}

fn parse_number(text: &str) -> Option<Decimal> {
    if text.is_empty() {
        return None;
    }

    let normalized = match (text.rfind(','), text.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => text.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => text.replace(',', ""),
        (Some(_), None) => text.replace(',', "."),
        _ => text.to_string(),
    };

    Decimal::from_str(&normalized)
        .ok()
        .filter(|value| value.abs() < max_amount())
}

/// Magnitude cap on parsed amounts; larger values keep two-decimal formatting exact
fn max_amount() -> Decimal {
    Decimal::new(1_000_000_000_000_000, 0)
}

/// Fixed two-decimal text (`3` → `"3.00"`)
pub fn format_amount(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Parse and format as fixed two-decimal text; `""` when the text is not a number
pub fn canonicalize_price(text: &str) -> String {
    parse_price(text).map(format_amount).unwrap_or_default()
}

/// Item count (`"2"`, `"2,00"`, `"x2"`)
pub fn parse_quantity(text: &str) -> Option<u32> {
    let cleaned = text.trim().trim_matches(|c| c == 'x' || c == 'X').trim();
    let value = Decimal::from_str(&cleaned.replace(',', ".")).ok()?;

    if value.is_sign_negative() {
        return None;
    }
    value.trunc().to_u32()
}

// ============================================================================
// NOISE & DATES
// ============================================================================

/// True for address, phone, staff/table/order and footer lines
pub fn looks_like_noise(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return false;
    }

    noise_table().iter().any(|re| re.is_match(&lowered))
}

/// First `D/D/YY(YY)` or `D-D-YY(YY)` substring
pub fn extract_date_substring(text: &str) -> Option<String> {
    date_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a receipt date (US order first, then European dotted, then ISO)
pub fn normalize_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    let candidate = extract_date_substring(trimmed).unwrap_or_else(|| trimmed.to_string());
    let two_digit_year = candidate
        .rsplit(|c| c == '/' || c == '-' || c == '.')
        .next()
        .map_or(false, |year| year.len() == 2);

    let formats: &[&str] = if two_digit_year {
        &["%m/%d/%y", "%m-%d-%y", "%d.%m.%y", "%d/%m/%y"]
    } else {
        &["%m/%d/%Y", "%m-%d-%Y", "%d.%m.%Y", "%d/%m/%Y"]
    };

    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&candidate, format).ok())
}

// ============================================================================
// FIELD NORMALIZER (bounded checks)
// ============================================================================

/// Plausibility bounds. The 10 000 ceilings keep misparsed fragments
/// (a phone number read as a total) out of the result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceBounds {
    /// Exclusive ceiling for one price
    pub price_ceiling: Decimal,

    /// Exclusive ceiling for a receipt total
    pub total_ceiling: Decimal,

    /// Inclusive ceiling for items read from auxiliary sections
    pub line_item_ceiling: Decimal,
}

impl Default for PriceBounds {
    fn default() -> Self {
        PriceBounds {
            price_ceiling: DEFAULT_PRICE_CEILING,
            total_ceiling: DEFAULT_PRICE_CEILING,
            line_item_ceiling: DEFAULT_LINE_ITEM_CEILING,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FieldNormalizer {
    bounds: PriceBounds,
}

impl FieldNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(bounds: PriceBounds) -> Self {
        FieldNormalizer { bounds }
    }

    /// Parses and `0 <= value < price_ceiling`
    pub fn is_plausible_price(&self, text: &str) -> bool {
        self.plausible_price(text).is_some()
    }

    /// The parsed value when it passes `is_plausible_price`
    pub fn plausible_price(&self, text: &str) -> Option<Decimal> {
        parse_price(text).filter(|v| within(*v, self.bounds.price_ceiling))
    }

    /// Parses and `0 <= value < total_ceiling`
    pub fn is_plausible_total(&self, text: &str) -> bool {
        parse_price(text).map_or(false, |v| self.is_plausible_total_value(v))
    }

    pub fn is_plausible_total_value(&self, value: Decimal) -> bool {
        within(value, self.bounds.total_ceiling)
    }

    pub fn canonicalize_price(&self, text: &str) -> String {
        canonicalize_price(text)
    }

    pub fn looks_like_noise(&self, text: &str) -> bool {
        looks_like_noise(text)
    }

    pub fn extract_date_substring(&self, text: &str) -> Option<String> {
        extract_date_substring(text)
    }

    /// Stricter test for entries outside the main items list
    pub fn is_likely_line_item(&self, name: &str, price: &str) -> bool {
        let value = match parse_price(price) {
            Some(v) => v,
            None => return false,
        };
        if value.is_sign_negative() || value > self.bounds.line_item_ceiling {
            return false;
        }

        let name = name.trim();
        if name.chars().count() < 2 || date_text_regex().is_match(name) {
            return false;
        }
        if name.chars().filter(|c| !c.is_whitespace()).all(|c| c.is_ascii_digit()) {
            return false;
        }

        !looks_like_noise(name)
    }
}

fn within(value: Decimal, ceiling: Decimal) -> bool {
    !value.is_sign_negative() && value < ceiling
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_comma_decimal() {
        assert_eq!(canonicalize_price("12,50"), "12.50");
    }

    #[test]
    fn test_canonicalize_european_thousands() {
        assert_eq!(canonicalize_price("1.234,56"), "1234.56");
    }

    #[test]
    fn test_canonicalize_us_thousands() {
        assert_eq!(canonicalize_price("1,234.56"), "1234.56");
    }

    #[test]
    fn test_canonicalize_rejects_text() {
        assert_eq!(canonicalize_price("abc"), "");
        assert_eq!(canonicalize_price(""), "");
    }

    #[test]
    fn test_canonicalize_strips_currency() {
        assert_eq!(canonicalize_price("$3"), "3.00");
        assert_eq!(canonicalize_price("$ 640,12"), "640.12");
        assert_eq!(canonicalize_price("CHF 12.5"), "12.50");
        assert_eq!(canonicalize_price("€4,00"), "4.00");
        assert_eq!(canonicalize_price("Fr. 7.20"), "7.20");
    }

    #[test]
    fn test_canonicalize_doubled_value() {
        assert_eq!(canonicalize_price("77.83 77.83"), "77.83");
    }

    #[test]
    fn test_canonicalize_rounds_half_up() {
        assert_eq!(canonicalize_price("2.005"), "2.01");
        assert_eq!(canonicalize_price("2.004"), "2.00");
    }

    #[test]
    fn test_oversized_amounts_rejected() {
        assert_eq!(parse_price("79228162514264337593543950335"), None);
        assert_eq!(canonicalize_price("79228162514264337593543950335"), "");
        assert_eq!(canonicalize_price("-1000000000000000"), "");
        assert_eq!(canonicalize_price("999999999999999.99"), "999999999999999.99");
        assert!(!FieldNormalizer::new().is_plausible_total("79228162514264337593543950335"));
    }

    #[test]
    fn test_plausibility_bound() {
        let normalizer = FieldNormalizer::new();

        assert!(!normalizer.is_plausible_price("15000"));
        assert!(normalizer.is_plausible_price("15.00"));
        assert!(normalizer.is_plausible_price("0"));
        assert!(!normalizer.is_plausible_price("-3.00"));
        assert!(!normalizer.is_plausible_price("10000"));
        assert!(normalizer.is_plausible_price("9999.99"));
        assert!(!normalizer.is_plausible_price("x"));
    }

    #[test]
    fn test_custom_bounds() {
        let normalizer = FieldNormalizer::with_bounds(PriceBounds {
            price_ceiling: Decimal::from(100),
            total_ceiling: Decimal::from(1000),
            line_item_ceiling: Decimal::from(50),
        });

        assert!(!normalizer.is_plausible_price("150.00"));
        assert!(normalizer.is_plausible_total("150.00"));
        assert!(!normalizer.is_plausible_total("1500"));
    }

    #[test]
    fn test_noise_detection() {
        assert!(looks_like_noise("123 Main St"));
        assert!(looks_like_noise("Tel: 555-123-4567"));
        assert!(looks_like_noise("(310) 555 1234"));
        assert!(looks_like_noise("Server: Maria"));
        assert!(looks_like_noise("Table 12"));
        assert!(looks_like_noise("ORDER #4411"));
        assert!(looks_like_noise("Guest count 2"));
        assert!(looks_like_noise("90254"));
        assert!(looks_like_noise("Thank you for visiting"));
        assert!(looks_like_noise("Hermosa, CA"));
    }

    #[test]
    fn test_noise_keeps_real_items() {
        assert!(!looks_like_noise("Coffee"));
        assert!(!looks_like_noise("2 Large Drink"));
        assert!(!looks_like_noise("Hotel Burger"));
        assert!(!looks_like_noise("Coffee, cake"));
        assert!(!looks_like_noise("Pad Thai"));
        assert!(!looks_like_noise(""));
    }

    #[test]
    fn test_extract_date_substring() {
        assert_eq!(extract_date_substring("12/05/2023 14:31"), Some("12/05/2023".to_string()));
        assert_eq!(extract_date_substring("CHK 4411 4-20-17"), Some("4-20-17".to_string()));
        assert_eq!(extract_date_substring("3.00"), None);
        assert_eq!(extract_date_substring("12/05/203"), None);
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("4/20/2017"), NaiveDate::from_ymd_opt(2017, 4, 20));
        assert_eq!(normalize_date("04/20/17"), NaiveDate::from_ymd_opt(2017, 4, 20));
        assert_eq!(normalize_date("2017-04-20"), NaiveDate::from_ymd_opt(2017, 4, 20));
        assert_eq!(normalize_date("20.04.2017"), NaiveDate::from_ymd_opt(2017, 4, 20));
        assert_eq!(normalize_date("Date 4/20/2017 10:02"), NaiveDate::from_ymd_opt(2017, 4, 20));
        assert_eq!(normalize_date("yesterday"), None);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("2"), Some(2));
        assert_eq!(parse_quantity("2,00"), Some(2));
        assert_eq!(parse_quantity("x3"), Some(3));
        assert_eq!(parse_quantity("1"), Some(1));
        assert_eq!(parse_quantity("two"), None);
        assert_eq!(parse_quantity("-2"), None);
    }

    #[test]
    fn test_likely_line_item() {
        let normalizer = FieldNormalizer::new();

        assert!(normalizer.is_likely_line_item("Side Salad", "4.50"));
        assert!(!normalizer.is_likely_line_item("Side Salad", "750.00"));
        assert!(!normalizer.is_likely_line_item("March 3, 2019", "4.50"));
        assert!(!normalizer.is_likely_line_item("4411", "4.50"));
        assert!(!normalizer.is_likely_line_item("X", "4.50"));
        assert!(!normalizer.is_likely_line_item("Table 4", "4.50"));
    }
}
