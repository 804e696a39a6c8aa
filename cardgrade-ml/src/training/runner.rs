//! Training runner — fine-tunes the grade classifier on an image folder.

use crate::dataset::{BatchIterator, ImageFolder};
use crate::error::{MlError, Result};
use crate::training::callbacks::TrainingCallback;
use crate::training::device::{device_name, select_device};
use crate::training::metrics::{EpochLoss, TrainingMetrics};
use crate::training::model::{
    GradeClassifier, build, load_backbone_weights, resolve_pretrained, save_weights,
    trainable_vars,
};
use cardgrade_core::TrainerConfig;
use candle_core::Device;
use candle_nn::{AdamW, ModuleT, Optimizer, ParamsAdamW, VarMap};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub metrics: TrainingMetrics,
    /// Class names in label order.
    pub classes: Vec<String>,
    pub device: String,
    pub output_path: PathBuf,
}

/// Fixed-epoch fine-tuning loop: Adam, cross-entropy, no validation split,
/// no schedule, no early stopping, a single save at the end.
pub struct TrainingRunner {
    config: TrainerConfig,
}

impl TrainingRunner {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    fn validate(&self) -> Result<()> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(MlError::invalid_input("batch_size must be at least 1"));
        }
        if c.num_classes == 0 {
            return Err(MlError::invalid_input("num_classes must be at least 1"));
        }
        if c.image_size == 0 {
            return Err(MlError::invalid_input("image_size must be at least 1"));
        }
        if !(c.learning_rate.is_finite() && c.learning_rate > 0.0) {
            return Err(MlError::invalid_input("learning_rate must be positive"));
        }
        Ok(())
    }

    /// Load the dataset, fine-tune, and write the final weights.
    pub fn run(&self, callback: &mut dyn TrainingCallback) -> Result<TrainingReport> {
        self.validate()?;
        let cfg = &self.config;

        let dataset = ImageFolder::open(&cfg.data_dir)?;
        if dataset.num_classes() > cfg.num_classes {
            return Err(MlError::dataset(format!(
                "Dataset has {} classes but the classifier is configured for {}",
                dataset.num_classes(),
                cfg.num_classes
            )));
        }
        info!(
            classes = ?dataset.classes(),
            counts = ?dataset.class_counts(),
            "Dataset ready"
        );

        let device = select_device()?;
        let (varmap, model) = build(cfg.num_classes, &device)?;
        if let Some(weights) = resolve_pretrained(&cfg.pretrained)? {
            load_backbone_weights(&varmap, &weights, &device)?;
        } else {
            info!("Pretrained weights disabled, backbone starts from random init");
        }

        let mut optimizer = AdamW::new(
            trainable_vars(&varmap)?,
            ParamsAdamW {
                lr: cfg.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let metrics = self.fit(&dataset, &model, &mut optimizer, &device, callback)?;

        save_weights(&varmap, &cfg.output_path)?;
        info!(path = %cfg.output_path.display(), "Saved model weights");

        Ok(TrainingReport {
            metrics,
            classes: dataset.classes().to_vec(),
            device: device_name(&device).to_string(),
            output_path: cfg.output_path.clone(),
        })
    }

    fn fit(
        &self,
        dataset: &ImageFolder,
        model: &GradeClassifier,
        optimizer: &mut AdamW,
        device: &Device,
        callback: &mut dyn TrainingCallback,
    ) -> Result<TrainingMetrics> {
        let cfg = &self.config;
        let mut rng = match cfg.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut batches = BatchIterator::new(dataset.len(), cfg.batch_size);
        let mut metrics = TrainingMetrics::new(dataset.len());
        let started = Instant::now();

        for epoch in 1..=cfg.epochs {
            batches.reshuffle(&mut rng);
            let mut epoch_loss = EpochLoss::default();

            while let Some(batch) = batches.next_batch(dataset, cfg.image_size, device)? {
                let logits = model.forward_t(&batch.images, true)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)?;
                optimizer.backward_step(&loss)?;

                let loss_val = f64::from(loss.to_scalar::<f32>()?);
                epoch_loss.add_batch(loss_val, batch.len());
                debug!(epoch, seen = epoch_loss.samples(), loss = loss_val, "Batch done");
            }

            let avg_loss = epoch_loss.average(dataset.len());
            if !avg_loss.is_finite() {
                return Err(MlError::training(format!(
                    "Loss diverged to {avg_loss} in epoch {epoch}"
                )));
            }
            metrics.record_epoch(avg_loss);
            callback.on_epoch_end(epoch, cfg.epochs, &metrics);
        }

        metrics.total_training_time_secs = started.elapsed().as_secs_f64();
        Ok(metrics)
    }
}

/// Weights written by [`TrainingRunner::run`], reloaded into a fresh model.
///
/// The artifact carries no metadata; `num_classes` must match the run.
pub fn load_trained(
    num_classes: usize,
    weights: &std::path::Path,
    device: &Device,
) -> Result<(VarMap, GradeClassifier)> {
    let (mut varmap, model) = build(num_classes, device)?;
    varmap.load(weights)?;
    Ok((varmap, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::write_png;
    use crate::training::callbacks::ConsoleReporter;
    use cardgrade_core::PretrainedConfig;
    use std::path::Path;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<(usize, usize, f64)>,
    }

    impl TrainingCallback for Recorder {
        fn on_epoch_end(&mut self, epoch: usize, total: usize, metrics: &TrainingMetrics) {
            self.lines.push((epoch, total, metrics.last_loss().unwrap()));
        }
    }

    fn smoke_config(root: &Path) -> TrainerConfig {
        TrainerConfig {
            data_dir: root.join("dataset"),
            batch_size: 4,
            epochs: 2,
            num_classes: 10,
            image_size: 32,
            output_path: root.join("models").join("grader.safetensors"),
            pretrained: PretrainedConfig {
                enabled: false,
                ..Default::default()
            },
            shuffle_seed: Some(7),
            ..Default::default()
        }
    }

    fn grade_folders(root: &Path) {
        for grade in 1..=10u8 {
            let shade = grade * 20;
            write_png(
                &root.join("dataset").join(grade.to_string()).join("front.png"),
                12,
                16,
                [shade, 255 - shade, 128],
            );
        }
    }

    #[test]
    fn test_trains_and_saves_artifact() {
        let dir = tempfile::tempdir().unwrap();
        grade_folders(dir.path());
        let config = smoke_config(dir.path());
        let mut recorder = Recorder::default();

        let report = TrainingRunner::new(config.clone())
            .run(&mut recorder)
            .unwrap();

        assert_eq!(recorder.lines.len(), 2);
        for (i, (epoch, total, loss)) in recorder.lines.iter().enumerate() {
            assert_eq!(*epoch, i + 1);
            assert_eq!(*total, 2);
            assert!(loss.is_finite() && *loss >= 0.0, "bad loss {loss}");
        }
        assert_eq!(report.metrics.epochs_completed, 2);
        assert_eq!(report.metrics.samples_per_epoch, 10);
        assert_eq!(report.classes.len(), 10);
        assert_eq!(report.device, "cpu");

        let size = std::fs::metadata(&config.output_path).unwrap().len();
        assert!(size > 0);

        let (_varmap, model) = load_trained(10, &config.output_path, &Device::Cpu).unwrap();
        assert_eq!(model.num_classes(), 10);
    }

    #[test]
    fn test_rerun_overwrites_artifact() {
        let dir = tempfile::tempdir().unwrap();
        grade_folders(dir.path());
        let mut config = smoke_config(dir.path());
        config.epochs = 1;
        std::fs::create_dir_all(config.output_path.parent().unwrap()).unwrap();
        std::fs::write(&config.output_path, b"stale").unwrap();

        TrainingRunner::new(config.clone())
            .run(&mut ConsoleReporter)
            .unwrap();
        assert_ne!(std::fs::read(&config.output_path).unwrap(), b"stale");
    }

    #[test]
    fn test_too_many_classes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        grade_folders(dir.path());
        let mut config = smoke_config(dir.path());
        config.num_classes = 5;

        let err = TrainingRunner::new(config)
            .run(&mut Recorder::default())
            .unwrap_err();
        assert!(matches!(err, MlError::Dataset(_)));
    }

    #[test]
    fn test_missing_dataset_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let config = smoke_config(dir.path());
        let mut recorder = Recorder::default();

        let err = TrainingRunner::new(config.clone())
            .run(&mut recorder)
            .unwrap_err();
        assert!(matches!(err, MlError::NotFound(_)));
        assert!(recorder.lines.is_empty());
        assert!(!config.output_path.exists());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = smoke_config(dir.path());
        config.batch_size = 0;
        assert!(matches!(
            TrainingRunner::new(config).run(&mut Recorder::default()),
            Err(MlError::InvalidInput(_))
        ));
    }
}
