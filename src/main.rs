//! pbcor-batch: primary-beam correct every spectral image in a directory.
//!
//! Exits 0 on success and 1 on missing inputs or any batch-level failure.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::warn;

use pbcor_batch::config::AppConfig;
use pbcor_batch::core::{AppResult, BatchReport};
use pbcor_batch::runtime::{parse_bool_flag, run_request, summary_line, PbcorRequest};
use pbcor_batch::util::init_tracing;

/// Perform primary beam correction of spectral image cubes.
#[derive(Parser, Debug)]
#[command(name = "pbcor-batch", version, about)]
struct Cli {
    /// Name of the image directory.
    #[arg(long, env = "PBCOR_IMAGEDIR")]
    imagedir: Option<PathBuf>,

    /// Name of the metafits file.
    #[arg(long, env = "PBCOR_METAFITS")]
    metafits: Option<PathBuf>,

    /// Spatial interpolation or not (True/False).
    #[arg(long, default_value = "True", value_parser = parse_bool_flag, action = ArgAction::Set)]
    interpolate: bool,

    /// Numbers of CPU threads to use (-1 detects idle cores).
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    ncpu: i64,

    /// Amount of memory in GB to use (-1 uses available memory).
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    mem: f64,

    /// JSON configuration file with `scheduler` and `beam` sections.
    #[arg(long, env = "PBCOR_CONFIG")]
    config: Option<PathBuf>,

    /// Print the batch report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let (Some(imagedir), Some(metafits)) = (cli.imagedir.clone(), cli.metafits.clone()) else {
        println!("Please provide necessary input parameters.");
        return ExitCode::from(1);
    };

    match run(&cli, imagedir, metafits) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli, imagedir: PathBuf, metafits: PathBuf) -> AppResult<()> {
    let cfg = AppConfig::load(cli.config.as_deref()).map_err(anyhow::Error::msg)?;
    let request = PbcorRequest {
        imagedir,
        metafits,
        interpolate: cli.interpolate,
        ncpu: cli.ncpu,
        mem: cli.mem,
    };

    let report = run_request(&request, &cfg.scheduler, &cfg.beam)?;
    print_report(&report, cli.json)
}

fn print_report(report: &BatchReport, json: bool) -> AppResult<()> {
    if json {
        let rendered = serde_json::to_string_pretty(report).context("serializing report")?;
        println!("{rendered}");
        return Ok(());
    }
    for failed in &report.failed {
        warn!(job = %failed.name, key = %failed.key, outcome = ?failed.outcome, "job did not succeed");
    }
    println!("{}", summary_line(report));
    Ok(())
}
