//! Parsers for the semi-structured parts of model output.
//!
//! Model text is untrusted: every parser here returns an explicit outcome and
//! never panics on malformed input.

use serde::Deserialize;
use serde_json::Value;

use crate::report::{format_usd, MarketListing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence<'a> {
    start: usize,
    end: usize,
    info: &'a str,
    body: &'a str,
}

impl Fence<'_> {
    fn is_json(&self) -> bool {
        let info = self.info.trim();
        info.eq_ignore_ascii_case("json")
            || (info.is_empty() && self.body.trim_start().starts_with('{'))
    }
}

/// Splits out every ```-fenced block. Only backticks at the start of a line
/// open a fence; an unterminated fence ends the scan.
fn fenced_blocks(text: &str) -> Vec<Fence<'_>> {
    let mut fences = Vec::new();
    let mut cursor = 0;
    while let Some(rel_open) = text[cursor..].find("```") {
        let start = cursor + rel_open;
        let after_ticks = start + 3;
        if start > 0 && text.as_bytes()[start - 1] != b'\n' {
            cursor = after_ticks;
            continue;
        }
        let Some(rel_newline) = text[after_ticks..].find('\n') else {
            break;
        };
        let info = &text[after_ticks..after_ticks + rel_newline];
        let body_start = after_ticks + rel_newline + 1;
        let Some(rel_close) = text[body_start - 1..].find("\n```") else {
            break;
        };
        let close_newline = body_start - 1 + rel_close;
        let body = &text[body_start..close_newline.max(body_start)];
        let end = close_newline + 1 + 3;
        fences.push(Fence {
            start,
            end,
            info,
            body,
        });
        cursor = end;
    }
    fences
}

#[derive(Debug, Deserialize)]
struct RawSources {
    sources: Vec<RawListing>,
}

#[derive(Debug, Deserialize)]
struct RawListing {
    name: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    condition: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    comparison: String,
}

impl From<RawListing> for MarketListing {
    fn from(raw: RawListing) -> Self {
        let display_value = match raw.value {
            Value::String(text) => text,
            Value::Number(number) => number
                .as_f64()
                .map(format_usd)
                .unwrap_or_else(|| number.to_string()),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        MarketListing {
            name: raw.name,
            display_value,
            condition: raw.condition,
            kind: raw.kind,
            url: raw.url,
            comparison: raw.comparison,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingsOutcome {
    Parsed(Vec<MarketListing>),
    /// No fenced JSON block in the response.
    Missing,
    /// A block was found but did not match `{"sources": [...]}`.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketExtraction {
    pub outcome: ListingsOutcome,
    pub narrative: String,
}

impl MarketExtraction {
    pub fn listings(&self) -> &[MarketListing] {
        match &self.outcome {
            ListingsOutcome::Parsed(listings) => listings,
            ListingsOutcome::Missing | ListingsOutcome::Malformed(_) => &[],
        }
    }

    pub fn into_listings(self) -> Vec<MarketListing> {
        match self.outcome {
            ListingsOutcome::Parsed(listings) => listings,
            ListingsOutcome::Missing | ListingsOutcome::Malformed(_) => Vec::new(),
        }
    }
}

/// Pulls the listings block out of a market-analysis response and returns the
/// narrative with every JSON block removed.
pub fn extract_market_listings(text: &str) -> MarketExtraction {
    let fences: Vec<Fence<'_>> = fenced_blocks(text)
        .into_iter()
        .filter(Fence::is_json)
        .collect();

    let outcome = match fences.first() {
        None => ListingsOutcome::Missing,
        Some(fence) => match parse_sources(fence.body) {
            Ok(listings) => ListingsOutcome::Parsed(listings),
            Err(reason) => ListingsOutcome::Malformed(reason),
        },
    };

    let mut narrative = String::with_capacity(text.len());
    let mut cursor = 0;
    for fence in &fences {
        narrative.push_str(&text[cursor..fence.start]);
        cursor = fence.end;
    }
    narrative.push_str(&text[cursor..]);

    MarketExtraction {
        outcome,
        narrative: collapse_blank_runs(narrative.trim()),
    }
}

fn parse_sources(body: &str) -> Result<Vec<MarketListing>, String> {
    let body = body.trim();
    let mut candidates = vec![body];
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if end > start && (start > 0 || end + 1 < body.len()) {
            candidates.push(&body[start..=end]);
        }
    }
    let mut last_error = String::from("empty block");
    for candidate in candidates {
        match serde_json::from_str::<RawSources>(candidate) {
            Ok(parsed) => return Ok(parsed.sources.into_iter().map(Into::into).collect()),
            Err(err) => last_error = err.to_string(),
        }
    }
    Err(last_error)
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    out.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricePairError {
    #[error("expected two comma-separated numbers, found {0} value(s)")]
    WrongArity(usize),
    #[error("{0:?} is not a non-negative number")]
    NotANumber(String),
}

/// Parses the `min,max` answer of the price stage, e.g. `"25.50,100.75"`.
pub fn parse_price_pair(raw: &str) -> Result<(f64, f64), PricePairError> {
    let cleaned = raw.trim().trim_matches(|c: char| matches!(c, '"' | '\'' | '`'));
    let parts: Vec<&str> = cleaned.split(',').collect();
    if parts.len() != 2 {
        return Err(PricePairError::WrongArity(parts.len()));
    }
    let min = parse_amount(parts[0])?;
    let max = parse_amount(parts[1])?;
    Ok((min, max))
}

fn parse_amount(token: &str) -> Result<f64, PricePairError> {
    let trimmed = token.trim();
    let numeric = trimmed.strip_prefix('$').unwrap_or(trimmed).trim();
    match numeric.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(PricePairError::NotANumber(trimmed.to_string())),
    }
}
