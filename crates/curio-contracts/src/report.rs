use std::fmt;

use serde::{Deserialize, Serialize};

use crate::knowledge::{ConditionTemplate, MarketSourceHint, ValueCategory};

/// Open-ended category tag produced by the classification stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectCategory(String);

impl ObjectCategory {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Normalizes a one-token model answer such as `"Pokemon_Card."` into a
    /// table key. Returns `None` when nothing usable remains.
    pub fn from_model_answer(raw: &str) -> Option<Self> {
        let trimmed = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '*'))
            .trim()
            .to_lowercase();
        if trimmed.is_empty() {
            return None;
        }
        let key = trimmed.split_whitespace().collect::<Vec<&str>>().join("_");
        Some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One comparable offer pulled out of the market analysis text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketListing {
    pub name: String,
    pub display_value: String,
    pub condition: String,
    pub kind: String,
    pub url: String,
    pub comparison: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

impl PriceRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            average: (min + max) / 2.0,
        }
    }

    /// The model is asked for `min,max` but the order is not enforced.
    pub fn is_ordered(&self) -> bool {
        self.min <= self.max
    }

    pub fn display(&self) -> String {
        if self.min == self.max {
            return format_usd(self.min);
        }
        format!("{} - {}", format_usd(self.min), format_usd(self.max))
    }
}

/// `1234.5` -> `$1,234.50`.
pub fn format_usd(amount: f64) -> String {
    let cents = format!("{:.2}", amount.abs());
    let (whole, fraction) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, digit) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{fraction}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionReport {
    pub assessment: String,
    pub template: ConditionTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub listings: Vec<MarketListing>,
    pub source_hints: Vec<MarketSourceHint>,
    /// Markdown with the embedded listings block removed.
    pub narrative: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEstimate {
    pub category: ValueCategory,
    pub range: PriceRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub category: ObjectCategory,
    pub display_label: String,
    pub identification: String,
    pub condition: ConditionReport,
    pub market_analysis: MarketAnalysis,
    pub value: ValueEstimate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_answers_normalize_to_table_keys() {
        let parse = |raw: &str| ObjectCategory::from_model_answer(raw).map(|c| c.to_string());
        assert_eq!(parse("  Pokemon_Card\n").as_deref(), Some("pokemon_card"));
        assert_eq!(parse("`collectible`.").as_deref(), Some("collectible"));
        assert_eq!(parse("\"Sports Card\"").as_deref(), Some("sports_card"));
        assert_eq!(parse("  ..  "), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn price_range_average_is_midpoint() {
        let range = PriceRange::new(25.50, 100.75);
        assert_eq!(range.average, 63.125);
        assert!(range.is_ordered());
        assert!(!PriceRange::new(10.0, 5.0).is_ordered());
    }

    #[test]
    fn usd_formatting_groups_thousands() {
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(25.5), "$25.50");
        assert_eq!(format_usd(999.999), "$1,000.00");
        assert_eq!(format_usd(1234567.891), "$1,234,567.89");
        assert_eq!(PriceRange::new(30.0, 50.0).display(), "$30.00 - $50.00");
        assert_eq!(PriceRange::new(40.0, 40.0).display(), "$40.00");
    }

    #[test]
    fn report_fields_use_camel_case() -> anyhow::Result<()> {
        let listing = MarketListing {
            name: "eBay".to_string(),
            display_value: "$40.00".to_string(),
            condition: "Near Mint".to_string(),
            kind: "marketplace".to_string(),
            url: "https://www.ebay.com/itm/1".to_string(),
            comparison: "Same grade".to_string(),
        };
        let encoded = serde_json::to_value(&listing)?;
        assert_eq!(encoded["displayValue"], serde_json::json!("$40.00"));
        assert!(encoded.get("display_value").is_none());
        Ok(())
    }
}
