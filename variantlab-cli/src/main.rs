use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use variantlab::experiments::simulator::DEFAULT_SEED_STRIDE;
use variantlab::experiments::stats::{
    check_sample_ratio_mismatch, required_sample_size, SampleSizeEstimate, SrmCheck,
};
use variantlab::{
    apply_simulated_metrics, compare_variants, complete_test, create_test, determine_winner,
    start_test, Test, TestError, VariantComparison, VariantDefinition, WinnerResult,
};

#[derive(Parser)]
#[command(name = "variantlab", about = "Analyze A/B tests of generated pages")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pretty-print the JSON report
    #[arg(long, global = true, env = "VARIANTLAB_PRETTY")]
    pretty: bool,

    /// Relative lift the sample size estimate should be able to detect
    #[arg(long, global = true, env = "VARIANTLAB_MDE", default_value_t = 0.1)]
    mde: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Build a test, run it on seeded synthetic metrics and report the result
    Demo {
        #[arg(long, default_value = "Hero Headline Test")]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Variant name; repeat for each variant (at least 2)
        #[arg(long = "variant", default_values = ["Control", "Bold CTA"])]
        variants: Vec<String>,
        /// Variant i is simulated with seed i * stride
        #[arg(long, env = "VARIANTLAB_SEED_STRIDE", default_value_t = DEFAULT_SEED_STRIDE)]
        seed_stride: i64,
        /// Complete the test after simulating, storing the winner
        #[arg(long)]
        complete: bool,
    },
    /// Report on a test previously saved as JSON
    Analyze {
        #[arg(long)]
        input: PathBuf,
        /// Variant to compare the others against (defaults to the first)
        #[arg(long)]
        baseline: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    test: Test,
    winner: Option<WinnerResult>,
    baseline_id: String,
    comparisons: Vec<VariantComparison>,
    sample_ratio: SrmCheck,
    sample_size: SampleSizeEstimate,
}

fn build_report(test: Test, baseline: Option<&str>, mde: f64) -> Result<Report, TestError> {
    let baseline_id = match baseline {
        Some(id) => id.to_string(),
        None => test
            .variants
            .first()
            .map(|v| v.id.clone())
            .ok_or(TestError::InvalidVariantCount(0))?,
    };
    let comparisons = compare_variants(&test, &baseline_id)?;
    for row in &comparisons {
        tracing::debug!(
            "{} beats baseline on {}/{} metrics",
            row.variant_name,
            row.better_count(),
            row.deltas.len()
        );
    }
    let baseline_rate = test.metrics_for(&baseline_id).conversion_rate;
    let sample_size = required_sample_size(baseline_rate, mde, 0.05, 0.8, test.variants.len());
    Ok(Report {
        winner: determine_winner(&test),
        sample_size,
        sample_ratio: check_sample_ratio_mismatch(&test),
        baseline_id,
        comparisons,
        test,
    })
}

fn run_demo(
    name: String,
    description: String,
    variants: Vec<String>,
    seed_stride: i64,
    complete: bool,
    mde: f64,
) -> Result<Report, TestError> {
    let definitions = variants
        .into_iter()
        .map(|variant| VariantDefinition::new(variant, serde_json::Value::Null))
        .collect();
    let test = create_test(name, description, definitions)?;
    let test = start_test(&test)?;
    let mut test = apply_simulated_metrics(&test, seed_stride)?;
    if complete {
        test = complete_test(&test)?;
    }
    build_report(test, None, mde)
}

fn run_analyze(
    input: PathBuf,
    baseline: Option<String>,
    mde: f64,
) -> Result<Report, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(&input)
        .map_err(|e| format!("failed to read {}: {}", input.display(), e))?;
    let test = Test::from_json(&data)?;
    tracing::info!(
        "loaded test {} ({}, {} variants)",
        test.id,
        test.status,
        test.variants.len()
    );
    Ok(build_report(test, baseline.as_deref(), mde)?)
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let report = match cli.command {
        Command::Demo {
            name,
            description,
            variants,
            seed_stride,
            complete,
        } => run_demo(name, description, variants, seed_stride, complete, cli.mde)?,
        Command::Analyze { input, baseline } => run_analyze(input, baseline, cli.mde)?,
    };

    if report.sample_ratio.mismatch {
        tracing::warn!(
            "observed traffic does not match the intended split (p={:.5})",
            report.sample_ratio.p_value
        );
    }

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);
    Ok(())
}
