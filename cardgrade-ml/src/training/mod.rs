//! Training infrastructure — classifier, device selection, runner, metrics, callbacks.

pub mod callbacks;
pub mod device;
pub mod metrics;
pub mod model;
pub mod runner;

pub use callbacks::{ConsoleReporter, TrainingCallback};
pub use metrics::TrainingMetrics;
pub use model::GradeClassifier;
pub use runner::{TrainingReport, TrainingRunner};
