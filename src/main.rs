// Entry point and high-level CLI flow.
//
// One invocation is one monthly run:
// - load the accumulated history and the newest extract,
// - reconcile them and fill reporting gaps,
// - compute the scorecard metrics,
// - write the new history, the placeholders, the metric table and a JSON
//   summary, then print a preview of the latest month per group.
use chrono::NaiveDate;
use clap::Parser;
use hac_scorecard::loader::{self, LoadReport};
use hac_scorecard::types::Observation;
use hac_scorecard::util::{format_int, parse_month};
use hac_scorecard::{output, pipeline, summary, HacError, PeriodMode, ReferenceData, Result};
use log::warn;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "hac_scorecard", version, about = "Reconcile NHSN HAC extracts and compute scorecard metrics")]
struct Cli {
    /// Accumulated history (the previous run's toDateData.csv).
    #[arg(long)]
    history: PathBuf,
    /// Newest extract.
    #[arg(long)]
    incoming: PathBuf,
    /// Reference data JSON (facilities, codes, baselines, targets, points).
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Targets CSV: Facility,Measure,Procedure,Target.
    #[arg(long)]
    targets: Option<PathBuf>,
    /// Bonus points CSV: Measure,Procedure,Points.
    #[arg(long)]
    anthem_points: Option<PathBuf>,
    /// Performance period: CY, FY or ROLL.
    #[arg(long, default_value = "CY")]
    period: String,
    /// Reference date for gap detection (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    as_of: Option<String>,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Scorecard rows to print.
    #[arg(long, default_value_t = 10)]
    preview: usize,
}

/// A missing file is an empty table; the reconciler decides whether that is fatal.
fn load_if_present(path: &Path, reference: &ReferenceData) -> Result<(Vec<Observation>, LoadReport)> {
    if !path.exists() {
        warn!("{} does not exist; treating it as empty.", path.display());
        return Ok((Vec::new(), LoadReport::default()));
    }
    loader::load_observations(path, reference)
}

fn run(cli: Cli) -> Result<()> {
    // Configuration errors surface before any data is touched.
    let period: PeriodMode = cli.period.parse()?;
    let as_of: NaiveDate = match cli.as_of.as_deref() {
        Some(s) => parse_month(Some(s)).ok_or_else(|| HacError::InvalidDate(s.to_string()))?,
        None => chrono::Local::now().date_naive(),
    };

    let mut reference = match &cli.reference {
        Some(p) => ReferenceData::load(p)?,
        None => ReferenceData::default(),
    };
    if let Some(p) = &cli.targets {
        reference.merge_targets(loader::load_targets(p)?);
    }
    if let Some(p) = &cli.anthem_points {
        reference.merge_anthem_points(loader::load_anthem_points(p)?);
    }

    let (history, mut load_report) = load_if_present(&cli.history, &reference)?;
    let (incoming, incoming_report) = load_if_present(&cli.incoming, &reference)?;
    load_report.merge(&incoming_report);
    println!(
        "Processing dataset... ({} history rows, {} incoming rows)",
        format_int(history.len()),
        format_int(incoming.len())
    );
    if load_report.warnings() > 0 {
        println!(
            "Note: {} data-quality warnings ({} rows rejected, {} unmapped facilities).",
            format_int(load_report.warnings()),
            format_int(load_report.rejected_rows),
            format_int(load_report.unmapped_facilities)
        );
    }

    let out = pipeline::run(&history, &incoming, load_report, &reference, period, as_of)?;

    std::fs::create_dir_all(&cli.out_dir)?;
    output::write_csv(cli.out_dir.join("toDateData.csv"), &out.history)?;
    output::write_csv(cli.out_dir.join("missingData.csv"), &out.placeholders)?;
    output::write_csv(cli.out_dir.join("scorecardData.csv"), &out.metrics)?;

    let card = summary::scorecard(&out.metrics);
    let run_summary = summary::generate_summary(&out.metrics, out.report.clone());
    output::write_json(cli.out_dir.join("summary.json"), &run_summary)?;

    println!(
        "Computed {} metric rows for {} groups ({} placeholder months).\n",
        format_int(out.report.metric_rows),
        format_int(out.report.groups),
        format_int(out.report.placeholders)
    );
    let note = format!("{} period, latest month per group", period);
    output::preview_table("HAC Scorecard", Some(&note), &card, cli.preview);
    println!("(Full table exported to {})", cli.out_dir.join("scorecardData.csv").display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
