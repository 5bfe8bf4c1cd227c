mod export;

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use curio_contracts::events::EventLog;
use curio_contracts::history::{HistoryEntry, HistoryStore};
use curio_contracts::image::EncodedImage;
use curio_contracts::report::AnalysisReport;
use curio_engine::dryrun::DryrunGateway;
use curio_engine::image::{normalize, read_image, DEFAULT_MAX_DIM};
use curio_engine::{
    AnalysisPipeline, Completion, GatewayConfig, InferenceGateway, OpenAiGateway, Session,
    SessionState,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_HISTORY_PATH: &str = ".curio/history.json";
const DEFAULT_LOG_FILTER: &str = "warn,curio=info,curio_engine=info";

#[derive(Debug, Parser)]
#[command(name = "curio", version, about = "Identify, grade and price a collectible from a photo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the five-stage analysis on one image.
    Analyze(AnalyzeArgs),
    /// List past analyses, newest first.
    History(HistoryArgs),
    /// Write a past analysis as a standalone HTML page.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long, required_unless_present = "image_data", conflicts_with = "image_data")]
    image: Option<PathBuf>,
    /// A `data:` URL or bare base64 payload; `-` reads it from stdin.
    #[arg(long)]
    image_data: Option<String>,
    #[arg(long, default_value = DEFAULT_HISTORY_PATH)]
    history: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_MAX_DIM)]
    max_dim: u32,
    /// Answer every stage with canned text instead of calling the service.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    html: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long, default_value = DEFAULT_HISTORY_PATH)]
    history: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long, default_value = DEFAULT_HISTORY_PATH)]
    history: PathBuf,
    /// Entry id, unique id prefix, or `latest`.
    #[arg(long, default_value = "latest")]
    entry: String,
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("curio error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::History(args) => run_history(args),
        Command::Export(args) => run_export(args),
    }
}

fn build_gateway(args: &AnalyzeArgs) -> Result<Box<dyn InferenceGateway>> {
    if args.dryrun {
        return Ok(Box::new(DryrunGateway));
    }
    let mut config = GatewayConfig::from_env()?;
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        config.model = model.to_string();
    }
    if let Some(secs) = args.timeout_secs {
        if secs == 0 {
            bail!("--timeout-secs must be positive");
        }
        config.timeout = Duration::from_secs(secs);
    }
    let api_base = config.api_base.clone();
    let gateway = OpenAiGateway::new(config)?;
    info!(model = gateway.model(), %api_base, "using OpenAI gateway");
    Ok(Box::new(gateway))
}

fn load_image(args: &AnalyzeArgs) -> Result<EncodedImage> {
    if let Some(path) = &args.image {
        return read_image(path)
            .with_context(|| format!("failed to load image {}", path.display()));
    }
    let payload = match args.image_data.as_deref() {
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read image data from stdin")?;
            buf
        }
        Some(data) => data.to_string(),
        None => bail!("either --image or --image-data is required"),
    };
    normalize(&payload).context("invalid --image-data")
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let gateway = build_gateway(&args)?;
    let image = load_image(&args)?;

    let mut session = Session::new(AnalysisPipeline::new(gateway), HistoryStore::open(&args.history))
        .with_max_image_dim(args.max_dim);
    if let Some(events_path) = &args.events {
        session = session.with_event_log(EventLog::new(events_path, Uuid::new_v4().to_string()));
    }

    if session.analyze(image) == Completion::Discarded {
        bail!("analysis was superseded before it finished");
    }
    match session.state() {
        SessionState::Succeeded { report, .. } => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(report.as_ref())?);
            } else {
                print_report(&report);
            }
            if let Some(out) = &args.html {
                let snapshot = session.history_snapshot();
                let entry = snapshot
                    .first()
                    .context("analysis succeeded but no history entry was recorded")?;
                export::export_entry_html(entry, out)?;
                println!("Exported to {}", out.display());
            }
            Ok(0)
        }
        SessionState::Failed { stage, message, .. } => {
            match stage {
                Some(stage) => eprintln!("Analysis failed at {stage}: {message}"),
                None => eprintln!("Analysis failed: {message}"),
            }
            Ok(2)
        }
        SessionState::Idle | SessionState::Running { .. } => {
            bail!("analysis did not reach a final state")
        }
    }
}

fn print_report(report: &AnalysisReport) {
    println!("{} ({})", report.display_label, report.category);
    println!(
        "Value: {} | {} (avg {})",
        report.value.category,
        report.value.range.display(),
        curio_contracts::report::format_usd(report.value.range.average)
    );
    println!();
    println!("{}", report.identification.trim());
    println!();
    println!("{}", report.condition.assessment.trim());
    println!();
    if report.market_analysis.listings.is_empty() {
        println!("No comparable listings found.");
    } else {
        println!("Comparable listings:");
        for listing in &report.market_analysis.listings {
            println!(
                "- {}: {} ({}) {}",
                listing.name, listing.display_value, listing.condition, listing.url
            );
        }
    }
    if !report.market_analysis.narrative.trim().is_empty() {
        println!();
        println!("{}", report.market_analysis.narrative.trim());
    }
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let store = HistoryStore::open(&args.history);
    if args.json {
        let reports: Vec<&AnalysisReport> = store.entries().iter().map(|entry| &entry.report).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(0);
    }
    if store.is_empty() {
        println!("No analyses recorded in {}", store.path().display());
        return Ok(0);
    }
    for entry in store.entries() {
        println!("{}", history_line(entry));
    }
    Ok(0)
}

fn history_line(entry: &HistoryEntry) -> String {
    let id = entry.id.to_string();
    format!(
        "{}  {}  {:<18}  {:<17}  {}",
        &id[..8],
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.report.display_label,
        entry.report.value.category.as_str(),
        entry.report.value.range.display()
    )
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let store = HistoryStore::open(&args.history);
    let entry = select_entry(&store, &args.entry)?;
    export::export_entry_html(entry, &args.out)?;
    println!("Exported to {}", args.out.display());
    Ok(0)
}

fn select_entry<'a>(store: &'a HistoryStore, selector: &str) -> Result<&'a HistoryEntry> {
    let selector = selector.trim();
    if selector.is_empty() || selector.eq_ignore_ascii_case("latest") {
        return store
            .latest()
            .with_context(|| format!("no analyses recorded in {}", store.path().display()));
    }
    store
        .find(selector)
        .with_context(|| format!("no single history entry matches {selector:?}"))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn seeded_store(path: &Path, count: usize) -> anyhow::Result<HistoryStore> {
        let pipeline = AnalysisPipeline::new(DryrunGateway);
        let mut store = HistoryStore::open(path);
        for _ in 0..count {
            let image = EncodedImage::new("image/jpeg", vec![0xff, 0xd8, 0xff])?;
            let report = pipeline.analyze(&curio_engine::AnalysisRequest::new(image.clone()))?;
            store.append(HistoryEntry::new(report, image))?;
        }
        Ok(store)
    }

    #[test]
    fn cli_parses_analyze_defaults() {
        let cli = Cli::parse_from(["curio", "analyze", "--image", "card.jpg", "--dryrun"]);
        match cli.command {
            Command::Analyze(args) => {
                assert_eq!(args.image, Some(PathBuf::from("card.jpg")));
                assert_eq!(args.image_data, None);
                assert_eq!(args.history, PathBuf::from(DEFAULT_HISTORY_PATH));
                assert_eq!(args.max_dim, DEFAULT_MAX_DIM);
                assert!(args.dryrun);
                assert!(!args.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn analyze_accepts_inline_image_data() -> anyhow::Result<()> {
        let cli = Cli::parse_from([
            "curio",
            "analyze",
            "--image-data",
            "data:image/png;base64,AQID",
            "--dryrun",
        ]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.image, None);
        let image = load_image(&args)?;
        assert_eq!(image.media_type(), "image/png");
        assert_eq!(image.bytes(), &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn analyze_requires_exactly_one_image_source() {
        assert!(Cli::try_parse_from(["curio", "analyze", "--dryrun"]).is_err());
        assert!(Cli::try_parse_from([
            "curio",
            "analyze",
            "--image",
            "card.jpg",
            "--image-data",
            "AQID",
        ])
        .is_err());
    }

    #[test]
    fn select_entry_resolves_latest_and_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = seeded_store(&temp.path().join("history.json"), 2)?;
        let latest = select_entry(&store, "latest")?;
        assert_eq!(latest.id, store.entries()[0].id);

        let older = &store.entries()[1];
        let prefix = older.id.to_string()[..13].to_string();
        assert_eq!(select_entry(&store, &prefix)?.id, older.id);
        assert!(select_entry(&store, "zzzz").is_err());
        Ok(())
    }

    #[test]
    fn select_entry_on_empty_history_fails() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = HistoryStore::open(temp.path().join("missing.json"));
        let err = match select_entry(&store, "latest") {
            Ok(_) => anyhow::bail!("expected an error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("no analyses recorded"));
        Ok(())
    }

    #[test]
    fn history_line_shows_value_summary() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = seeded_store(&temp.path().join("history.json"), 1)?;
        let line = history_line(&store.entries()[0]);
        assert!(line.contains("Collectible Item"));
        assert!(line.contains("Somewhat Valuable"));
        assert!(line.contains("$30.00 - $50.00"));
        Ok(())
    }
}
