//! # Compute Device Selection
//!
//! Picks the candle device the classifier runs on. GPU preferences fall back to
//! the CPU when the backend is not compiled in or no device is present, so a
//! misconfigured host still serves predictions.

use crate::config::DevicePreference;
use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Result of automatic detection, computed once per process.
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => best_device(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or_else(|| {
            warn!("CUDA requested but not available, falling back to CPU");
            Device::Cpu
        }),
        DevicePreference::Metal => metal_device().unwrap_or_else(|| {
            warn!("Metal requested but not available, falling back to CPU");
            Device::Cpu
        }),
    }
}

fn best_device() -> Device {
    BEST_DEVICE
        .get_or_init(|| {
            if let Some(device) = cuda_device() {
                info!("Selected CUDA GPU for inference");
                return device;
            }
            if let Some(device) = metal_device() {
                info!("Selected Metal GPU for inference");
                return device;
            }
            info!("Using CPU for inference");
            Device::Cpu
        })
        .clone()
}

fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

/// Short name for logs and the health endpoint.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
