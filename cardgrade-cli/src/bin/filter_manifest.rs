//! Drop manifest records without a numeric grade.
//!
//! Usage: `filter-manifest <input_json> <output_json>`

use cardgrade_ml::manifest::{filter_numeric_grades, load_manifest, save_manifest};
use clap::Parser;
use std::path::PathBuf;

/// Keep only manifest records whose grade is a number
#[derive(Parser, Debug)]
#[command(name = "filter-manifest", version, about, long_about = None)]
struct Cli {
    /// Manifest JSON written by the scraper
    input_json: PathBuf,

    /// Where the filtered manifest is written (overwritten)
    output_json: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _startup = cardgrade_cli::startup("filter-manifest")?;

    let records = load_manifest(&cli.input_json)?;
    let outcome = filter_numeric_grades(records);
    save_manifest(&cli.output_json, &outcome.kept)?;

    tracing::info!(kept = outcome.kept.len(), dropped = outcome.dropped, "Manifest filtered");
    println!(
        "Filtered {} invalid entries. Output: {}",
        outcome.dropped,
        cli.output_json.display()
    );

    Ok(())
}
