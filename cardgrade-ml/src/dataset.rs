//! Image-folder dataset: `<root>/<class>/<image>`, one class per subfolder.
//!
//! Class names are sorted as strings and numbered in that order, so a grade
//! set `1..=10` maps `"1" -> 0, "10" -> 1, "2" -> 2, ...`. Images are decoded
//! lazily, one batch at a time.

use crate::error::{MlError, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions recognised as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp",
];

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// One labelled image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: u32,
}

/// Labelled image files discovered under a dataset root.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageFolder {
    /// Scan `root` for class folders and their images.
    ///
    /// Fails when the root is missing, holds no class folder, or any class
    /// folder holds no image.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(MlError::not_found(format!(
                "Dataset directory {} does not exist",
                root.display()
            )));
        }

        let mut classes = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                classes.push(name);
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(MlError::dataset(format!(
                "Couldn't find any class folder in {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let before = samples.len();
            for entry in WalkDir::new(root.join(class))
                .follow_links(true)
                .sort_by_file_name()
            {
                let entry = entry?;
                if entry.file_type().is_file() && has_image_extension(entry.path()) {
                    samples.push(Sample {
                        path: entry.into_path(),
                        label: label as u32,
                    });
                }
            }
            if samples.len() == before {
                return Err(MlError::dataset(format!(
                    "Found no valid file for the class {class}. Supported extensions are: {}",
                    IMAGE_EXTENSIONS.join(", ")
                )));
            }
        }

        tracing::info!(
            root = %root.display(),
            classes = classes.len(),
            samples = samples.len(),
            "Loaded image folder"
        );

        Ok(Self {
            classes,
            samples,
        })
    }

    /// Class names in label order.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per class, in label order.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label as usize] += 1;
        }
        counts
    }
}

/// Decode `path`, resize to `image_size`², and return a `[3, H, W]` f32
/// tensor with values in `[0, 1]`. Every image is converted to RGB.
pub fn load_image(path: &Path, image_size: usize) -> Result<Tensor> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let side = image_size as u32;
    let rgb = img.resize_exact(side, side, FilterType::Triangle).to_rgb8();
    let tensor = Tensor::from_vec(rgb.into_raw(), (image_size, image_size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?;
    Ok(tensor)
}

/// A decoded mini-batch.
pub struct Batch {
    /// `[B, 3, H, W]`
    pub images: Tensor,
    /// `[B]`, u32 class indices
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.dims1().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mini-batch iterator over an [`ImageFolder`]. Reshuffled every epoch; the
/// last batch may be short.
pub struct BatchIterator {
    indices: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl BatchIterator {
    pub fn new(len: usize, batch_size: usize) -> Self {
        Self {
            indices: (0..len).collect(),
            batch_size: batch_size.max(1),
            pos: 0,
        }
    }

    /// Start a new epoch in a fresh random order.
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.indices.shuffle(rng);
        self.pos = 0;
    }

    /// Sample indices of the next batch, or `None` once the epoch is exhausted.
    pub fn next_indices(&mut self) -> Option<&[usize]> {
        let n = self.indices.len();
        if self.pos >= n {
            return None;
        }
        let start = self.pos;
        let end = (start + self.batch_size).min(n);
        self.pos = end;
        Some(&self.indices[start..end])
    }

    /// Decode the next batch and move it to `device`.
    pub fn next_batch(
        &mut self,
        dataset: &ImageFolder,
        image_size: usize,
        device: &Device,
    ) -> Result<Option<Batch>> {
        let Some(indices) = self.next_indices() else {
            return Ok(None);
        };

        let mut images = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let sample = &dataset.samples[i];
            images.push(load_image(&sample.path, image_size)?);
            labels.push(sample.label);
        }

        let images = Tensor::stack(&images, 0)?.to_device(device)?;
        let labels = Tensor::new(labels, device)?;
        Ok(Some(Batch { images, labels }))
    }
}
