use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use curio_contracts::history::HistoryEntry;
use curio_contracts::markdown::{is_blocked_url, render_safe_html};
use curio_contracts::report::{AnalysisReport, MarketListing};
use html_escape::{encode_double_quoted_attribute, encode_text};

pub(crate) fn export_entry_html(entry: &HistoryEntry, out_path: &Path) -> Result<()> {
    let html_doc = render_entry_html(entry);
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(out_path, html_doc).with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(())
}

pub(crate) fn render_entry_html(entry: &HistoryEntry) -> String {
    let report = &entry.report;
    let title = format!("{} Analysis", report.display_label);
    let created = entry.created_at.format("%Y-%m-%d %H:%M UTC").to_string();
    let image = entry
        .image
        .as_ref()
        .map(|image| {
            format!(
                "<div class=\"thumb\"><img src=\"{}\" alt=\"analyzed item\"></div>",
                encode_double_quoted_attribute(&image.data_url())
            )
        })
        .unwrap_or_default();

    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>{title}</title>\n  <style>\n    body {{ font-family: Arial, sans-serif; background: #f6f6f6; margin: 0; padding: 20px; }}\n    section {{ background: white; border-radius: 10px; padding: 16px; margin-bottom: 16px; box-shadow: 0 2px 8px rgba(0,0,0,0.08); }}\n    .thumb img {{ max-width: 320px; max-height: 320px; }}\n    .value {{ font-size: 20px; font-weight: bold; }}\n    .meta {{ font-size: 12px; color: #666; }}\n    table {{ border-collapse: collapse; }}\n    td, th {{ border: 1px solid #ddd; padding: 4px 8px; text-align: left; }}\n  </style>\n</head>\n<body>\n  <h1>{title}</h1>\n  <div class=\"meta\">{created} &middot; {id}</div>\n  {image}\n  {value}\n  <section><h2>Identification</h2>{identification}</section>\n  <section><h2>Condition</h2>{condition}</section>\n  <section><h2>Market Analysis</h2>{listings}{narrative}</section>\n</body>\n</html>\n",
        title = encode_text(&title),
        created = encode_text(&created),
        id = encode_text(&entry.id.to_string()),
        value = render_value(report),
        identification = render_safe_html(&report.identification),
        condition = render_safe_html(&report.condition.assessment),
        listings = render_listings(&report.market_analysis.listings),
        narrative = render_safe_html(&report.market_analysis.narrative),
    )
}

fn render_value(report: &AnalysisReport) -> String {
    format!(
        "<section><div class=\"value\">{}</div><div>{}</div></section>",
        encode_text(report.value.category.as_str()),
        encode_text(&report.value.range.display()),
    )
}

fn render_listings(listings: &[MarketListing]) -> String {
    if listings.is_empty() {
        return String::new();
    }
    let mut rows = String::new();
    for listing in listings {
        let name = if listing.url.trim().is_empty() || is_blocked_url(&listing.url) {
            encode_text(&listing.name).into_owned()
        } else {
            format!(
                "<a href=\"{}\" rel=\"noopener noreferrer\">{}</a>",
                encode_double_quoted_attribute(listing.url.trim()),
                encode_text(&listing.name)
            )
        };
        rows.push_str(&format!(
            "<tr><td>{name}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            encode_text(&listing.display_value),
            encode_text(&listing.condition),
            encode_text(&listing.kind),
            encode_text(&listing.comparison),
        ));
    }
    format!(
        "<table><thead><tr><th>Source</th><th>Price</th><th>Condition</th><th>Type</th><th>Comparison</th></tr></thead><tbody>{rows}</tbody></table>"
    )
}
