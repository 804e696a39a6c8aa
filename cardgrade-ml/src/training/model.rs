//! Grade classifier: ResNet-18 backbone with a fresh classification head.
//!
//! Variable names follow the torchvision layout (`conv1.weight`,
//! `layer1.0.bn1.running_mean`, `fc.weight`, ...) so ImageNet checkpoints in
//! that layout load directly. The ImageNet `fc` head is never loaded; the
//! head here is sized to the grade count and starts from random init.

use crate::error::{MlError, Result};
use cardgrade_core::PretrainedConfig;
use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Linear, Module, ModuleT, VarBuilder, VarMap};
use std::path::{Path, PathBuf};

/// Width of the pooled ResNet-18 feature vector.
pub const FEATURE_DIM: usize = 512;

/// Variable prefix of the classification head.
pub const HEAD_PREFIX: &str = "fc";

const BN_EPS: f64 = 1e-5;

fn conv(
    in_c: usize,
    out_c: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    vb: VarBuilder,
) -> candle_core::Result<Conv2d> {
    let cfg = Conv2dConfig {
        stride,
        padding,
        ..Default::default()
    };
    candle_nn::conv2d_no_bias(in_c, out_c, kernel, cfg, vb)
}

fn batch_norm(channels: usize, vb: VarBuilder) -> candle_core::Result<BatchNorm> {
    candle_nn::batch_norm(channels, BN_EPS, vb)
}

/// Pad the two spatial dims of an NCHW tensor with `value`.
fn pad_spatial(
    xs: &Tensor,
    before: usize,
    after: usize,
    value: f32,
) -> candle_core::Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    let fill = |shape: (usize, usize, usize, usize)| -> candle_core::Result<Tensor> {
        Tensor::full(value, shape, xs.device())?.to_dtype(xs.dtype())
    };
    let xs = Tensor::cat(&[&fill((b, c, h, before))?, xs, &fill((b, c, h, after))?], 3)?;
    let wide = w + before + after;
    Tensor::cat(
        &[&fill((b, c, before, wide))?, &xs, &fill((b, c, after, wide))?],
        2,
    )
}

/// 3x3 max pool, stride 2, padding 1, built from strided views so it has a
/// gradient (candle's `max_pool2d` only differentiates when kernel == stride).
pub fn max_pool_3x3_s2(xs: &Tensor) -> candle_core::Result<Tensor> {
    const K: usize = 3;
    const S: usize = 2;
    const PAD: usize = 1;

    let (b, c, h, w) = xs.dims4()?;
    let out_h = (h + 2 * PAD - K) / S + 1;
    let out_w = (w + 2 * PAD - K) / S + 1;
    // Extra trailing padding lets every view span `S * out` elements.
    let padded = pad_spatial(xs, PAD, PAD + S, f32::MIN)?;

    let mut pooled: Option<Tensor> = None;
    for dy in 0..K {
        for dx in 0..K {
            let view = padded
                .narrow(2, dy, S * out_h)?
                .narrow(3, dx, S * out_w)?
                .reshape((b, c, out_h, S, out_w, S))?
                .narrow(5, 0, 1)?
                .squeeze(5)?
                .narrow(3, 0, 1)?
                .squeeze(3)?;
            pooled = Some(match pooled {
                Some(acc) => acc.maximum(&view)?,
                None => view,
            });
        }
    }
    pooled.ok_or_else(|| candle_core::Error::Msg("empty pooling window".into()))
}

/// Two 3x3 convolutions with an identity or 1x1 projection shortcut.
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl BasicBlock {
    fn new(in_c: usize, out_c: usize, stride: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let downsample = if stride != 1 || in_c != out_c {
            Some((
                conv(in_c, out_c, 1, stride, 0, vb.pp("downsample.0"))?,
                batch_norm(out_c, vb.pp("downsample.1"))?,
            ))
        } else {
            None
        };
        Ok(Self {
            conv1: conv(in_c, out_c, 3, stride, 1, vb.pp("conv1"))?,
            bn1: batch_norm(out_c, vb.pp("bn1"))?,
            conv2: conv(out_c, out_c, 3, 1, 1, vb.pp("conv2"))?,
            bn2: batch_norm(out_c, vb.pp("bn2"))?,
            downsample,
        })
    }
}

impl ModuleT for BasicBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let shortcut = match &self.downsample {
            Some((conv, bn)) => xs.apply(conv)?.apply_t(bn, train)?,
            None => xs.clone(),
        };
        let ys = xs
            .apply(&self.conv1)?
            .apply_t(&self.bn1, train)?
            .relu()?
            .apply(&self.conv2)?
            .apply_t(&self.bn2, train)?;
        (ys + shortcut)?.relu()
    }
}

/// ResNet-18 up to global average pooling: `[B, 3, H, W]` -> `[B, 512]`.
struct Backbone {
    conv1: Conv2d,
    bn1: BatchNorm,
    blocks: Vec<BasicBlock>,
}

impl Backbone {
    fn new(vb: VarBuilder) -> candle_core::Result<Self> {
        let conv1 = conv(3, 64, 7, 2, 3, vb.pp("conv1"))?;
        let bn1 = batch_norm(64, vb.pp("bn1"))?;

        let mut blocks = Vec::with_capacity(8);
        let mut in_c = 64;
        for (i, out_c) in [64, 128, 256, 512].into_iter().enumerate() {
            let layer = vb.pp(format!("layer{}", i + 1));
            let stride = if i == 0 { 1 } else { 2 };
            blocks.push(BasicBlock::new(in_c, out_c, stride, layer.pp("0"))?);
            blocks.push(BasicBlock::new(out_c, out_c, 1, layer.pp("1"))?);
            in_c = out_c;
        }
        Ok(Self { conv1, bn1, blocks })
    }
}

impl ModuleT for Backbone {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = max_pool_3x3_s2(&xs.apply(&self.conv1)?.apply_t(&self.bn1, train)?.relu()?)?;
        for block in &self.blocks {
            xs = xs.apply_t(block, train)?;
        }
        xs.mean(D::Minus1)?.mean(D::Minus1)
    }
}

pub struct GradeClassifier {
    backbone: Backbone,
    head: Linear,
    num_classes: usize,
}

impl GradeClassifier {
    /// Build the network, registering every weight in the builder's var map.
    pub fn new(num_classes: usize, vb: VarBuilder) -> Result<Self> {
        if num_classes == 0 {
            return Err(MlError::invalid_input("num_classes must be at least 1"));
        }
        let backbone = Backbone::new(vb.clone())?;
        let head = candle_nn::linear(FEATURE_DIM, num_classes, vb.pp(HEAD_PREFIX))?;
        Ok(Self {
            backbone,
            head,
            num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl ModuleT for GradeClassifier {
    /// `[B, 3, H, W]` -> `[B, num_classes]` logits. With `train` set, batch
    /// norm normalises with batch statistics and updates its running ones.
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.head.forward(&xs.apply_t(&self.backbone, train)?)
    }
}

fn is_head(name: &str) -> bool {
    name.strip_prefix(HEAD_PREFIX)
        .is_some_and(|rest| rest.starts_with('.'))
}

fn is_running_stat(name: &str) -> bool {
    name.ends_with(".running_mean") || name.ends_with(".running_var")
}

/// Variables the optimiser updates: everything except batch-norm running
/// statistics.
pub fn trainable_vars(varmap: &VarMap) -> Result<Vec<Var>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| MlError::model("Variable store lock poisoned"))?;
    Ok(data
        .iter()
        .filter(|(name, _)| !is_running_stat(name))
        .map(|(_, var)| var.clone())
        .collect())
}

/// Overwrite every backbone variable with its value from a safetensors file.
///
/// Returns the number of variables loaded. A backbone variable missing from
/// the file, or present with a different shape, is an error.
pub fn load_backbone_weights(varmap: &VarMap, weights: &Path, device: &Device) -> Result<usize> {
    let tensors = candle_core::safetensors::load(weights, device)?;
    let data = varmap
        .data()
        .lock()
        .map_err(|_| MlError::model("Variable store lock poisoned"))?;

    let mut loaded = 0;
    for (name, var) in data.iter() {
        if is_head(name) {
            continue;
        }
        let tensor = tensors.get(name).ok_or_else(|| {
            MlError::model(format!(
                "Pretrained weights {} have no tensor {name}",
                weights.display()
            ))
        })?;
        var.set(&tensor.to_dtype(var.dtype())?)
            .map_err(|e| MlError::model(format!("Cannot load {name}: {e}")))?;
        loaded += 1;
    }

    tracing::info!(path = %weights.display(), tensors = loaded, "Loaded pretrained backbone");
    Ok(loaded)
}

/// Locate the pretrained backbone weights, downloading them if needed.
///
/// `None` when pretraining is disabled. A configured local file takes
/// precedence over the hub; hub downloads are cached by `hf-hub`.
pub fn resolve_pretrained(config: &PretrainedConfig) -> Result<Option<PathBuf>> {
    if !config.enabled {
        return Ok(None);
    }

    if let Some(path) = &config.local_path {
        if !path.is_file() {
            return Err(MlError::not_found(format!(
                "Pretrained weights {} do not exist",
                path.display()
            )));
        }
        return Ok(Some(path.clone()));
    }

    tracing::info!(repo = %config.hub_repo, file = %config.hub_file, "Fetching pretrained weights");
    let api = hf_hub::api::sync::Api::new()?;
    let path = api.model(config.hub_repo.clone()).get(&config.hub_file)?;
    Ok(Some(path))
}

/// Write every variable, running statistics included, to `path`.
pub fn save_weights(varmap: &VarMap, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    varmap.save(path)?;
    Ok(())
}

/// Fresh var map plus classifier on `device`.
pub fn build(num_classes: usize, device: &Device) -> Result<(VarMap, GradeClassifier)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = GradeClassifier::new(num_classes, vb)?;
    Ok((varmap, model))
}
