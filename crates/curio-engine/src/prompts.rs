//! Prompt text for each stage. Builders are pure so the wording can be
//! asserted in tests without a gateway.

use curio_contracts::knowledge::{ConditionTemplate, MarketSourceHint};

const MARKET_SOURCE_LISTINGS: usize = 3;

pub(crate) fn classify_prompt(known_categories: &[String]) -> String {
    format!(
        "What type of object is this? Respond with just one of: {}\n\
         Answer with the single label only. Use collectible when nothing else fits.",
        known_categories.join(", ")
    )
}

pub(crate) fn identify_prompt(display_label: &str) -> String {
    format!(
        "Provide a detailed identification of this {display_label}. Include:\n\n\
         # Object Details\n\
         - Exact name/title\n\
         - Year/series\n\
         - Manufacturer/publisher\n\
         - Materials\n\
         - Special features or variants\n\
         - Unique identifiers and distinguishing marks\n\n\
         Format using markdown with headers and bullet points."
    )
}

pub(crate) fn condition_prompt(display_label: &str, template: &ConditionTemplate) -> String {
    let criteria = template
        .criteria
        .iter()
        .map(|criterion| {
            format!(
                "## {} ({} points)\n- {}\n- Assess condition and assign points (0-{})",
                criterion.name, criterion.max_points, criterion.description, criterion.max_points
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n");
    let grades = template
        .grades
        .iter()
        .map(|grade| {
            format!(
                "- {} ({}): {}+ points - {}",
                grade.label, grade.score_value, grade.min_points, grade.description
            )
        })
        .collect::<Vec<String>>()
        .join("\n");

    format!(
        "Analyze the condition of this {display_label} using these criteria:\n\n\
         # Condition Assessment Criteria\n\
         {criteria}\n\n\
         Provide a detailed markdown report with:\n\
         1. Points assigned for each criterion\n\
         2. Specific observations\n\
         3. Total points calculated (out of {max_points})\n\
         4. Overall grade based on this scale:\n\n\
         {grades}",
        max_points = template.max_points(),
    )
}

pub(crate) fn market_prompt(
    sources: &[MarketSourceHint],
    identification: &str,
    condition: &str,
) -> String {
    let mut ranked: Vec<&MarketSourceHint> = sources.iter().collect();
    ranked.sort_by_key(|hint| hint.priority);
    let source_lines = ranked
        .iter()
        .map(|hint| format!("{}. {} ({})", hint.priority, hint.name, hint.kind.as_str()))
        .collect::<Vec<String>>()
        .join("\n");

    format!(
        "Based on the identification and condition assessment, provide a market analysis.\n\n\
         # Market Value Analysis\n\n\
         ## Market Sources\n\
         Prefer these sources, in this order:\n\
         {source_lines}\n\n\
         Provide {MARKET_SOURCE_LISTINGS} specific listings where this item is currently offered, including:\n\
         - Source name\n\
         - Listed price\n\
         - Condition description\n\
         - Source type\n\
         - URL to listing\n\
         - How the listing compares to this item\n\n\
         Start your answer with this JSON inside a markdown code block:\n\
         ```json\n\
         {{\n  \"sources\": [\n    {{\n      \"name\": \"Source Name\",\n      \"value\": \"$XX.XX\",\n      \"condition\": \"Condition description\",\n      \"type\": \"marketplace\",\n      \"url\": \"https://example.com\",\n      \"comparison\": \"How it compares\"\n    }}\n  ]\n}}\n\
         ```\n\n\
         ## Value Matrix\n\
         Create a markdown table showing values for each condition grade\n\n\
         ## Market Information\n\
         - Current market trends\n\
         - Notable value factors\n\
         - Price history trends\n\n\
         Use the following details:\n\
         {identification}\n\n\
         {condition}"
    )
}

pub(crate) fn price_prompt(market_text: &str) -> String {
    format!(
        "Based on the market analysis below, provide only the minimum and maximum price in USD \
         for the assessed condition as numbers separated by a comma. For example: \"25.50,100.75\"\n\n\
         Analysis:\n\
         {market_text}"
    )
}
