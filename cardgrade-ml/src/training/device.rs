//! Device selection: CUDA when present at runtime, CPU otherwise.

use crate::error::Result;
use candle_core::Device;

/// Pick the compute device for training.
///
/// Without the `cuda` feature this is always the CPU.
pub fn select_device() -> Result<Device> {
    let device = Device::cuda_if_available(0)?;
    if device.is_cuda() {
        tracing::info!("Using CUDA device 0");
    } else {
        tracing::info!("No CUDA device available, using CPU");
    }
    Ok(device)
}

/// Short name for logs and reports.
pub fn device_name(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}
