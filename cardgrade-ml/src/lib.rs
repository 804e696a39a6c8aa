//! # cardgrade-ml — card image datasets and grade classifier training
//!
//! Three stages of the grading workflow:
//! 1. **Manifest** — parse and filter the scraped card listings
//! 2. **Fetch** — download listing images into `<grade>/` folders
//! 3. **Training** — fine-tune a pretrained ResNet-18 on those folders

pub mod dataset;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod training;

// Re-exports
pub use dataset::{BatchIterator, ImageFolder};
pub use error::MlError;
pub use fetch::{FetchSummary, ImageFetcher};
pub use manifest::{CardRecord, Side};
pub use training::{ConsoleReporter, TrainingReport, TrainingRunner};
