//! Compute device selection.

use crate::common::*;

/// Picks the compute device, falling back to CPU if the requested one is unavailable.
pub fn select_device(requested: Device, force_cpu: bool) -> Device {
    if force_cpu {
        warn!("force CPU mode, GPU disabled by user");
        return Device::Cpu;
    }

    match requested {
        Device::Cuda(index) => {
            if !tch::Cuda::is_available() {
                warn!(
                    "CUDA is not available, falling back to CPU. Training will be much slower"
                );
                Device::Cpu
            } else if index as i64 >= tch::Cuda::device_count() {
                warn!(
                    "CUDA device {} does not exist, {} device(s) found, use cuda(0) instead",
                    index,
                    tch::Cuda::device_count()
                );
                Device::Cuda(0)
            } else {
                info!(
                    "use CUDA device {} of {}, cudnn available: {}",
                    index,
                    tch::Cuda::device_count(),
                    tch::Cuda::cudnn_is_available()
                );
                requested
            }
        }
        other => other,
    }
}

/// Decides whether mixed precision is used on `device`.
pub fn use_mixed_precision(requested: bool, device: Device) -> bool {
    match (requested, device.is_cuda()) {
        (true, true) => {
            info!("mixed precision training enabled");
            true
        }
        (true, false) => {
            warn!("mixed precision requires a CUDA device, training runs in full precision");
            false
        }
        (false, _) => false,
    }
}

/// Called once the epoch tensors are dropped.
///
/// `tch` exposes no call to empty the CUDA caching allocator, so freed blocks stay
/// cached for reuse by the next epoch.
pub fn release_device_memory(device: Device) {
    if device.is_cuda() {
        debug!(
            "epoch tensors released on {:?}, the caching allocator keeps the freed blocks",
            device
        );
    }
}
