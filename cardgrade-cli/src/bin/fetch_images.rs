//! Download card images listed in a manifest into grade-named folders.
//!
//! Usage: `fetch-images <input_json> <output_dir>`

use cardgrade_ml::ImageFetcher;
use cardgrade_ml::manifest::load_manifest;
use clap::Parser;
use std::path::PathBuf;

/// Download card images from a manifest, sorted into <output_dir>/<grade>/
#[derive(Parser, Debug)]
#[command(name = "fetch-images", version, about, long_about = None)]
struct Cli {
    /// Manifest JSON: an array of {id, grade, imgUrlFront, imgUrlBack}
    input_json: PathBuf,

    /// Dataset root; one folder per grade is created inside
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let startup = cardgrade_cli::startup("fetch-images")?;

    let records = load_manifest(&cli.input_json)?;
    tracing::info!(
        records = records.len(),
        output = %cli.output_dir.display(),
        "Fetching card images"
    );

    let fetcher = ImageFetcher::new(&cli.output_dir, &startup.config.fetcher)?;
    let summary = fetcher.fetch_all(&records).await?;
    println!("Done. {summary}");

    Ok(())
}
