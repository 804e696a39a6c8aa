//! Training callbacks — per-epoch progress reporting.

use crate::training::metrics::TrainingMetrics;

/// Observer invoked by the runner after every epoch.
pub trait TrainingCallback {
    /// `epoch` is 1-based; `metrics` already includes this epoch.
    fn on_epoch_end(&mut self, epoch: usize, total_epochs: usize, metrics: &TrainingMetrics);
}

/// Prints `Epoch <n>/<N> - Loss: <x.xxxx>` to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn format_line(epoch: usize, total_epochs: usize, loss: f64) -> String {
        format!("Epoch {epoch}/{total_epochs} - Loss: {loss:.4}")
    }
}

impl TrainingCallback for ConsoleReporter {
    fn on_epoch_end(&mut self, epoch: usize, total_epochs: usize, metrics: &TrainingMetrics) {
        if let Some(loss) = metrics.last_loss() {
            println!("{}", Self::format_line(epoch, total_epochs, loss));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_line_format() {
        assert_eq!(
            ConsoleReporter::format_line(1, 5, 2.302585),
            "Epoch 1/5 - Loss: 2.3026"
        );
    }
}
