//! Fine-tune a ResNet-18 grade classifier on an image-folder dataset.
//!
//! Takes no arguments. Dataset path, batch size, epochs, class count and
//! image size come from the configuration (`.cardgrade/config.toml`,
//! `CARDGRADE_TRAINER__*`), whose defaults are `dataset/`, 16, 5, 10, 224.

use cardgrade_ml::{ConsoleReporter, TrainingRunner};
use clap::Parser;

/// Train the card grade classifier and save its weights
#[derive(Parser, Debug)]
#[command(name = "train-grader", version, about, long_about = None)]
struct Cli {}

fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();
    let startup = cardgrade_cli::startup("train-grader")?;
    let trainer = startup.config.trainer;

    tracing::info!(
        data_dir = %trainer.data_dir.display(),
        batch_size = trainer.batch_size,
        epochs = trainer.epochs,
        num_classes = trainer.num_classes,
        image_size = trainer.image_size,
        "Starting training"
    );

    let report = TrainingRunner::new(trainer).run(&mut ConsoleReporter)?;
    println!("Model saved to {}", report.output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_positional_arguments() {
        assert!(Cli::try_parse_from(["train-grader"]).is_ok());
        assert!(Cli::try_parse_from(["train-grader", "dataset"]).is_err());
    }
}
