//! # prob-mps
//!
//! Matrix product state Born machine: a fixed-length generative model over
//! sequences whose probabilities are squared magnitudes of MPS amplitudes,
//! with full gradient flow through candle.
//!
//! ## Overview
//!
//! - **Model**: [`ProbMps`](model::ProbMps) with `forward` (log probabilities),
//!   `loss` (negative log likelihood) and `log_norm` (log partition function)
//! - **MPS building blocks**: near-identity init, slice selection,
//!   sequential / tree contraction, rescaled log-norm
//! - **Primitives**: device selection and split-complex tensors
//! - **Training**: wrapped optimizers, clipped steps, an epoch driver
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use prob_mps::prelude::*;
//!
//! let device = best_device();
//! let config = ProbMpsConfig::new(16, 2, 8).with_bias(true);
//! let model = ProbMps::new(config, &device)?;
//!
//! let data = MpsInput::from_sequences(&sequences, &device)?;
//! let mut trainer = Trainer::new(&model, LearningConfig::default())?;
//! trainer.fit(&model, &data)?;
//!
//! let log_probs = model.forward(&data)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod model;
pub mod mps_base;
pub mod primitives;
pub mod training;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for MPS model operations
#[derive(Debug, thiserror::Error)]
pub enum MpsError {
    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Non-finite value: {0}")]
    NonFinite(String),

    #[error("{count} sequence(s) have zero amplitude")]
    ZeroAmplitude { count: usize },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for MPS model operations
pub type Result<T> = std::result::Result<T, MpsError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{MpsError, Result};

    pub use crate::primitives::{
        best_device, gpu_disabled, with_gpu_sync, CTensor,
    };

    pub use crate::mps_base::ContractionMode;

    pub use crate::model::{MpsInput, MpsParams, Precision, ProbMps, ProbMpsConfig};

    pub use crate::training::{
        check_gradients_health, compute_grad_norm, evaluate, safe_optimizer_step, EpochSummary,
        LearningConfig, MetricsTracker, Optimizer, Trainer, TrainingResult,
    };
}
