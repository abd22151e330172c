//! RPKI Replay CLI
//!
//! Entry point for the `rpki-replay` command-line tool.

use chrono::NaiveDate;
use clap::Parser;
use rpki_replay::{Config, Pipeline, SystemRunner};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "rpki-replay")]
#[command(about = "Reconstruct a historical RPKI repository snapshot for one date", version)]
struct Cli {
    /// Configuration file to use
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Date to process (YYYY-MM-DD or YYYYMMDD)
    #[arg(long, short = 'd')]
    date: String,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    let date = match parse_date(&cli.date) {
        Some(d) => d,
        None => {
            eprintln!("Unparsable date '{}', expected YYYY-MM-DD", cli.date);
            process::exit(1);
        }
    };

    let config = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load the configuration from {}: {}",
                cli.config.display(),
                e
            );
            process::exit(1);
        }
    };

    let runner = SystemRunner;
    let pipeline = Pipeline::new(&config, &runner);

    match pipeline.run(date) {
        Ok(report) => {
            if cli.json {
                // The run itself completed; a report that cannot be
                // rendered must not turn it into a failure.
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error serializing report: {}", e),
                }
            } else {
                println!();
                println!("Processed {} archive(s) for {}", report.archives_processed, report.date);
                println!("  Objects extracted: {}", report.objects_extracted);
                println!("  Trust anchors: {}", report.trust_anchors_installed);
                println!("  TALs written: {}", report.tals_written);
                println!("  Watermark: {}", report.watermark);
                match report.validator_status {
                    Some(0) => println!("  Validator: ok"),
                    Some(code) => println!("  Validator: exited with {}", code),
                    None => println!("  Validator: did not run"),
                }
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("Failed to process data for {}: {}", date, e);
            process::exit(e.exit_code());
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}
