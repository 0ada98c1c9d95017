//! Model configuration

use crate::mps_base::{ContractionMode, DEFAULT_INIT_NOISE};
use crate::{MpsError, Result};
use candle_core::DType;
use serde::{Deserialize, Serialize};

/// Floating point precision of the model parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F64,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F64 => DType::F64,
        }
    }
}

/// Hyperparameters of a [`ProbMps`](super::ProbMps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbMpsConfig {
    /// Length of the fixed-length input sequences
    pub seq_len: usize,

    /// Alphabet size for discrete inputs, feature dimension for vector inputs
    pub input_dim: usize,

    /// Dimension of the bonds linking adjacent cores
    pub bond_dim: usize,

    /// Use complex parameters (more expressive, twice the parameters)
    #[serde(default)]
    pub complex_params: bool,

    /// Contract with the pairwise tree instead of the sequential sweep
    #[serde(default)]
    pub parallel_eval: bool,

    /// Add a trainable bias matrix to every core slice
    #[serde(default)]
    pub use_bias: bool,

    /// Standard deviation of the noise added to the near-identity cores
    #[serde(default = "default_init_noise")]
    pub init_noise: f64,

    #[serde(default)]
    pub precision: Precision,
}

fn default_init_noise() -> f64 {
    DEFAULT_INIT_NOISE
}

impl ProbMpsConfig {
    /// Real-valued, sequentially contracted, unbiased model
    pub fn new(seq_len: usize, input_dim: usize, bond_dim: usize) -> Self {
        Self {
            seq_len,
            input_dim,
            bond_dim,
            complex_params: false,
            parallel_eval: false,
            use_bias: false,
            init_noise: DEFAULT_INIT_NOISE,
            precision: Precision::F32,
        }
    }

    /// Builder: complex parameters
    pub fn with_complex_params(mut self, complex_params: bool) -> Self {
        self.complex_params = complex_params;
        self
    }

    /// Builder: tree contraction
    pub fn with_parallel_eval(mut self, parallel_eval: bool) -> Self {
        self.parallel_eval = parallel_eval;
        self
    }

    /// Builder: bias matrix
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Builder: init noise
    pub fn with_init_noise(mut self, init_noise: f64) -> Self {
        self.init_noise = init_noise;
        self
    }

    /// Builder: parameter precision
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn contraction_mode(&self) -> ContractionMode {
        if self.parallel_eval {
            ContractionMode::Parallel
        } else {
            ContractionMode::Sequential
        }
    }

    /// Check that all dimensions are positive and the noise is usable
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("seq_len", self.seq_len),
            ("input_dim", self.input_dim),
            ("bond_dim", self.bond_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(MpsError::Config(format!("{} must be positive", name)));
            }
        }
        if !(self.init_noise >= 0.0 && self.init_noise.is_finite()) {
            return Err(MpsError::Config(format!(
                "init_noise must be finite and non-negative, got {}",
                self.init_noise
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MpsError::Config(format!("invalid model config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
