//! Training metrics tracking.

use serde::{Deserialize, Serialize};

/// Loss history for one training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    /// Sample-weighted mean training loss per epoch.
    pub loss_history: Vec<f64>,
    pub samples_per_epoch: usize,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    pub fn new(samples_per_epoch: usize) -> Self {
        Self {
            samples_per_epoch,
            ..Default::default()
        }
    }

    pub fn record_epoch(&mut self, loss: f64) {
        self.loss_history.push(loss);
        self.epochs_completed += 1;
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

/// Running sum of per-sample loss within one epoch.
///
/// Batch losses are means over the batch, so each is weighted by its batch
/// length; the short final batch counts for exactly its samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochLoss {
    total: f64,
    samples: usize,
}

impl EpochLoss {
    pub fn add_batch(&mut self, mean_loss: f64, batch_len: usize) {
        self.total += mean_loss * batch_len as f64;
        self.samples += batch_len;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Average over `dataset_len` samples; zero for an empty dataset.
    pub fn average(&self, dataset_len: usize) -> f64 {
        if dataset_len == 0 {
            0.0
        } else {
            self.total / dataset_len as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_epoch() {
        let mut metrics = TrainingMetrics::new(32);
        metrics.record_epoch(2.3);
        metrics.record_epoch(1.9);
        assert_eq!(metrics.epochs_completed, 2);
        assert_eq!(metrics.last_loss(), Some(1.9));
        assert_eq!(metrics.samples_per_epoch, 32);
    }

    #[test]
    fn test_epoch_loss_weights_by_batch_len() {
        let mut loss = EpochLoss::default();
        loss.add_batch(1.0, 16);
        loss.add_batch(4.0, 4);
        assert_eq!(loss.samples(), 20);
        assert!((loss.average(20) - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_epoch_loss_empty() {
        assert_eq!(EpochLoss::default().average(0), 0.0);
    }
}
