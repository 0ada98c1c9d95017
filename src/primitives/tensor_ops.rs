//! Device selection and host readback helpers
//!
//! ## Thread Safety
//!
//! Metal GPU command buffers are **not thread-safe** for concurrent encoding.
//! When evaluating models from several threads either force CPU mode:
//!
//! ```bash
//! export PROB_MPS_NO_GPU=1
//! ```
//!
//! or wrap the calls in [`with_gpu_sync`]:
//!
//! ```rust,ignore
//! use prob_mps::primitives::with_gpu_sync;
//!
//! let log_probs = with_gpu_sync(|| model.forward(&batch))?;
//! ```

use crate::{MpsError, Result};
use candle_core::{DType, Device, Tensor};
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing::info;

// ============================================================================
// GPU Synchronization
// ============================================================================

static GPU_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

fn gpu_mutex() -> &'static Mutex<()> {
    GPU_MUTEX.get_or_init(|| Mutex::new(()))
}

/// Execute a closure with serialized GPU access.
///
/// Use this when several threads share one model on a GPU device and can
/// tolerate serialized execution.
pub fn with_gpu_sync<T, F: FnOnce() -> T>(f: F) -> T {
    let _guard = gpu_mutex().lock();
    f()
}

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `PROB_MPS_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("PROB_MPS_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for model evaluation
///
/// Priority:
/// 1. `PROB_MPS_NO_GPU` (forces CPU if set)
/// 2. Metal (Apple Silicon)
/// 3. CUDA
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (PROB_MPS_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

// ============================================================================
// Host Readback
// ============================================================================

/// Copy every element of a float tensor to the host as `f64`.
///
/// Works for both `F32` and `F64` tensors of any rank.
pub fn host_values(tensor: &Tensor) -> Result<Vec<f64>> {
    tensor
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F64))
        .and_then(|t| t.to_vec1::<f64>())
        .map_err(|e| MpsError::Tensor(format!("host readback failed: {}", e)))
}

/// Read a single-element float tensor as `f64`.
pub fn host_scalar(tensor: &Tensor) -> Result<f64> {
    let vals = host_values(tensor)?;
    match vals.as_slice() {
        [v] => Ok(*v),
        _ => Err(MpsError::Tensor(format!(
            "expected a single element, got shape {:?}",
            tensor.dims()
        ))),
    }
}

/// Fail with [`MpsError::NonFinite`] if any element is NaN or infinite.
pub fn ensure_finite(tensor: &Tensor, what: &str) -> Result<()> {
    let bad = host_values(tensor)?
        .into_iter()
        .filter(|v| !v.is_finite())
        .count();
    if bad > 0 {
        return Err(MpsError::NonFinite(format!(
            "{} has {} non-finite value(s)",
            what, bad
        )));
    }
    Ok(())
}
