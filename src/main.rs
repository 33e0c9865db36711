//! ndvi-et-trend - yearly NDVI and evapotranspiration trend analysis
//!
//! A CLI tool that builds yearly NDVI and ET composites over a region,
//! reduces them to regional means, charts the trend, computes their
//! correlation and submits per-year raster exports.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (invalid range, missing region or dataset, backend failure, etc.)
//!   2 - Completed, but some (year, variable) reductions or exports failed

mod analysis;
mod backend;
mod chart;
mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod report;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use models::Report;
use pipeline::{Pipeline, RunPlan};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so the file can raise verbosity
    let (mut config, config_source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(config.log_level(args.quiet));

    info!("ndvi-et-trend v{}", env!("CARGO_PKG_VERSION"));
    match config_source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .ndvi-et.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to set the region, years, datasets and backend.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete workflow. Returns exit code (0 or 2).
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let pipeline_config = config.to_pipeline_config()?;

    let report_path = report_path(&args, &config);
    let chart_path = config.chart_path();

    // Handle --dry-run: describe the plan and exit
    if args.dry_run {
        let plan = pipeline::plan(&pipeline_config)?;
        return Ok(handle_dry_run(&plan));
    }

    println!("🛰️  Initializing backend...");
    println!("   Kind: {}", config.backend.kind);
    match config.backend.kind {
        cli::BackendKind::Local => println!("   Catalog: {}", config.backend.catalog_dir),
        cli::BackendKind::Http => println!("   URL: {}", config.backend.url),
    }
    let backend = backend::build_backend(&config.backend).context("Failed to create backend")?;
    let backend_name = backend.name().to_string();

    println!(
        "\n📈 Analysing {} from {} to {}...",
        pipeline_config.region_id, pipeline_config.start_year, pipeline_config.end_year
    );
    let pipeline = Pipeline::new(backend, pipeline_config).with_progress(!args.quiet);
    let output = pipeline.run().await?;

    // Build and save the report
    println!("\n📝 Generating report...");
    let duration = start_time.elapsed().as_secs_f64();
    let report = report::build_report(&output, &backend_name, duration);

    let content = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    std::fs::write(&report_path, &content)
        .with_context(|| format!("Failed to write report to {}", report_path.display()))?;

    std::fs::write(&chart_path, report.chart.render_svg())
        .with_context(|| format!("Failed to write chart to {}", chart_path.display()))?;

    print_summary(&report, duration);
    println!("\n✅ Report saved to: {}", report_path.display());
    println!("   Chart saved to: {}", chart_path.display());

    let failures = report.failure_count();
    if failures > 0 {
        eprintln!(
            "\n⚠️  {} reduction or export step(s) failed (exit code 2).",
            failures
        );
        return Ok(2);
    }

    Ok(0)
}

/// Print the series table and correlation to the console.
fn print_summary(report: &Report, duration: f64) {
    println!("\n📊 Yearly Series:");
    println!("   {:>6}  {:>10}  {:>10}", "Year", "NDVI", "ET");
    for record in &report.table.records {
        println!(
            "   {:>6}  {:>10}  {:>10}",
            record.year,
            report::format_value(record.ndvi_mean),
            report::format_value(record.et_mean)
        );
    }
    println!(
        "\n   Correlation (NDVI vs ET): {}",
        report::format_correlation(report.correlation)
    );
    if !report.exports.is_empty() {
        println!("   Exports submitted: {}", report.exports.len());
    }
    println!("   Duration: {:.1}s", duration);
}

/// Handle --dry-run: print what would be computed and exported, exit.
fn handle_dry_run(plan: &RunPlan) -> i32 {
    println!("\n🔍 Dry run (no backend calls)...\n");
    println!("   Region: {}", plan.region_id);
    println!(
        "   Years: {} to {} ({} years)",
        plan.years.start(),
        plan.years.end(),
        plan.years.len()
    );
    for series in [&plan.series.vegetation, &plan.series.et] {
        println!(
            "   {}: {} band {} x {}",
            series.variable, series.dataset_id, series.band, series.scale_factor
        );
    }

    println!("\n   {} reductions:", plan.reductions.len());
    for reduction in &plan.reductions {
        println!(
            "     📐 {} {} at {} m",
            reduction.year, reduction.variable, reduction.scale
        );
    }

    if plan.exports.is_empty() {
        println!("\n   Exports disabled.");
    } else {
        println!("\n   {} exports:", plan.exports.len());
        for (folder, name) in &plan.exports {
            println!("     📦 {}/{}", folder, name);
        }
    }

    println!("\n✅ Dry run complete. No backend calls were made.");
    0
}

/// Report path, switching the default extension for JSON output.
fn report_path(args: &Args, config: &Config) -> PathBuf {
    let path = config.output_path();
    if args.output.is_none() && args.format == OutputFormat::Json {
        return path.with_extension("json");
    }
    path
}

/// Load configuration from file or use defaults, with the file it came from.
///
/// Only a missing default file falls back to defaults; a malformed one is an
/// error.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, Some(config_path.clone())));
    }

    let config = Config::load_default()?;
    let source = config.as_ref().map(|_| PathBuf::from(CONFIG_FILE_NAME));
    Ok((config.unwrap_or_default(), source))
}
