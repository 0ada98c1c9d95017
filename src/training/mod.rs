//! Training Infrastructure
//!
//! Optimizers, gradient diagnostics, and an epoch driver for minimizing the
//! negative log likelihood of a [`ProbMps`].
//!
//! ## Overview
//!
//! - **Optimizers**: Wrapped candle-nn optimizers (AdamW, SGD)
//! - **Safe steps**: NaN detection and global gradient-norm clipping
//! - **Metrics**: Loss tracking and convergence monitoring
//! - **Trainer**: Mini-batch epochs over an [`MpsInput`] dataset
//!
//! ## Example
//!
//! ```ignore
//! use prob_mps::prelude::*;
//!
//! let model = ProbMps::new(ProbMpsConfig::new(16, 2, 8), &device)?;
//! let mut trainer = Trainer::new(&model, LearningConfig::default())?;
//!
//! for summary in trainer.fit(&model, &train_data)? {
//!     println!("epoch {}: nll={:.4}", summary.epoch, summary.mean_loss);
//! }
//! ```

use crate::model::{MpsInput, ProbMps};
use crate::primitives::{host_scalar, host_values};
use crate::{MpsError, Result};
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::optim::Optimizer as CandleOptimizer;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Optimizers
// =============================================================================

/// Wrapper around candle-nn's AdamW optimizer
pub struct AdamOptimizer {
    inner: candle_nn::optim::AdamW,
}

impl AdamOptimizer {
    /// Create a new Adam optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            weight_decay,
            ..Default::default()
        };

        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars, params)
            .map_err(|e| MpsError::Training(format!("AdamW init failed: {}", e)))?;

        Ok(Self { inner })
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| MpsError::Training(format!("Adam step failed: {}", e)))
    }

    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

/// Wrapper around candle-nn's SGD optimizer
pub struct SGDOptimizer {
    inner: candle_nn::optim::SGD,
}

impl SGDOptimizer {
    /// Create a new SGD optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let inner = <candle_nn::optim::SGD as CandleOptimizer>::new(vars, learning_rate)
            .map_err(|e| MpsError::Training(format!("SGD init failed: {}", e)))?;

        Ok(Self { inner })
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| MpsError::Training(format!("SGD step failed: {}", e)))
    }

    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

/// Optimizer enum for flexibility
pub enum Optimizer {
    /// Stochastic Gradient Descent optimizer
    SGD(SGDOptimizer),
    /// Adam optimizer with weight decay (AdamW)
    Adam(AdamOptimizer),
}

impl Optimizer {
    /// Create SGD optimizer
    pub fn sgd(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::SGD(SGDOptimizer::new(vars, learning_rate)?))
    }

    /// Create Adam optimizer
    pub fn adam(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        Ok(Self::Adam(AdamOptimizer::new(vars, learning_rate, weight_decay)?))
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::SGD(opt) => opt.step(grads),
            Self::Adam(opt) => opt.step(grads),
        }
    }

    /// Step with NaN detection and gradient clipping, see [`safe_optimizer_step`]
    pub fn safe_step(
        &mut self,
        grads: &mut GradStore,
        vars: &[Var],
        max_grad_norm: f32,
    ) -> Result<f32> {
        match self {
            Self::SGD(opt) => safe_optimizer_step(&mut opt.inner, grads, vars, max_grad_norm),
            Self::Adam(opt) => safe_optimizer_step(&mut opt.inner, grads, vars, max_grad_norm),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::SGD(opt) => opt.learning_rate(),
            Self::Adam(opt) => opt.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::SGD(opt) => opt.set_learning_rate(lr),
            Self::Adam(opt) => opt.set_learning_rate(lr),
        }
    }
}

// =============================================================================
// Configuration and Metrics
// =============================================================================

/// Configuration for NLL training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Learning rate
    pub learning_rate: f64,

    /// Sequences per mini-batch
    pub batch_size: usize,

    /// Maximum number of passes over the data
    pub epochs: usize,

    /// Gradient clipping threshold (global L2 norm)
    pub grad_clip: f32,

    /// Use AdamW (true) or SGD (false)
    pub use_adam: bool,

    /// Weight decay for AdamW
    pub weight_decay: f64,

    /// Stop after this many epochs without a new best loss
    #[serde(default)]
    pub patience: Option<usize>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            batch_size: 32,
            epochs: 10,
            grad_clip: 10.0,
            use_adam: true,
            weight_decay: 0.0,
            patience: None,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(MpsError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(MpsError::Config("batch_size must be positive".into()));
        }
        if !(self.grad_clip > 0.0) {
            return Err(MpsError::Config(format!(
                "grad_clip must be positive, got {}",
                self.grad_clip
            )));
        }
        Ok(())
    }
}

/// Result of a training step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Loss value
    pub loss: f32,

    /// Number of samples processed
    pub samples: usize,

    /// Gradient norms (for monitoring)
    pub grad_norms: Vec<f32>,

    /// Training step number
    pub step: usize,
}

/// Summary of one pass over the training data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,

    /// Sample-weighted mean NLL over the batches that were applied
    pub mean_loss: f32,

    /// Batches applied
    pub batches: usize,

    /// Batches skipped because of non-finite gradients
    pub skipped: usize,

    pub duration_ms: u64,
}

/// Training metrics tracker
#[derive(Debug, Default)]
pub struct MetricsTracker {
    losses: Vec<f32>,
    best_loss: Option<f32>,
    steps_since_improvement: usize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a loss value
    pub fn record_loss(&mut self, loss: f32) {
        self.losses.push(loss);

        if self.best_loss.map_or(true, |best| loss < best) {
            self.best_loss = Some(loss);
            self.steps_since_improvement = 0;
        } else {
            self.steps_since_improvement += 1;
        }
    }

    /// Record a training result
    pub fn record(&mut self, result: &TrainingResult) {
        self.record_loss(result.loss);
    }

    /// Check if training has converged (no improvement for N records)
    pub fn has_converged(&self, patience: usize) -> bool {
        self.steps_since_improvement >= patience
    }

    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    pub fn total_steps(&self) -> usize {
        self.losses.len()
    }
}

// =============================================================================
// Trainer
// =============================================================================

/// Mini-batch NLL trainer for a [`ProbMps`]
///
/// Batches are taken in order along the batch axis of the dataset.
pub struct Trainer {
    optimizer: Optimizer,
    vars: Vec<Var>,
    config: LearningConfig,
    step_metrics: MetricsTracker,
    epoch_metrics: MetricsTracker,
    steps: usize,
}

impl Trainer {
    /// Set up an optimizer over all of the model's trainable variables
    pub fn new(model: &ProbMps, config: LearningConfig) -> Result<Self> {
        config.validate()?;
        let vars = model.trainable_vars();
        let optimizer = if config.use_adam {
            Optimizer::adam(vars.clone(), config.learning_rate, config.weight_decay)?
        } else {
            Optimizer::sgd(vars.clone(), config.learning_rate)?
        };

        Ok(Self {
            optimizer,
            vars,
            config,
            step_metrics: MetricsTracker::new(),
            epoch_metrics: MetricsTracker::new(),
            steps: 0,
        })
    }

    /// One optimizer update on a single batch
    ///
    /// Fails with [`MpsError::Training`] without touching the parameters when
    /// the gradients contain NaN or Inf.
    pub fn step(&mut self, model: &ProbMps, batch: &MpsInput) -> Result<TrainingResult> {
        let loss = model.loss(batch)?;
        let loss_val = host_scalar(&loss)? as f32;
        let mut grads = loss.backward()?;
        let grad_norm = self
            .optimizer
            .safe_step(&mut grads, &self.vars, self.config.grad_clip)?;

        let result = TrainingResult {
            loss: loss_val,
            samples: batch.batch_size(),
            grad_norms: vec![grad_norm],
            step: self.steps,
        };
        self.steps += 1;
        self.step_metrics.record(&result);
        debug!(step = result.step, loss = loss_val, grad_norm, "training step");
        Ok(result)
    }

    /// One pass over `data` in mini-batches
    pub fn fit_epoch(&mut self, model: &ProbMps, data: &MpsInput) -> Result<EpochSummary> {
        let start = Instant::now();
        let epoch = self.epoch_metrics.total_steps();
        let mut weighted_loss = 0.0f64;
        let mut samples = 0usize;
        let mut batches = 0usize;
        let mut skipped = 0usize;

        for (offset, len) in batch_ranges(data.batch_size(), self.config.batch_size) {
            let batch = data.narrow_batch(offset, len)?;
            match self.step(model, &batch) {
                Ok(result) => {
                    weighted_loss += result.loss as f64 * result.samples as f64;
                    samples += result.samples;
                    batches += 1;
                }
                Err(MpsError::Training(msg)) => {
                    warn!(epoch, offset, "skipping batch: {}", msg);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if samples == 0 {
            return Err(MpsError::Training(format!(
                "epoch {} applied no batches ({} skipped)",
                epoch, skipped
            )));
        }

        let summary = EpochSummary {
            epoch,
            mean_loss: (weighted_loss / samples as f64) as f32,
            batches,
            skipped,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        self.epoch_metrics.record_loss(summary.mean_loss);
        info!(
            epoch,
            mean_loss = summary.mean_loss,
            batches,
            skipped,
            duration_ms = summary.duration_ms,
            "epoch complete"
        );
        Ok(summary)
    }

    /// Run up to `config.epochs` epochs, stopping early once `patience`
    /// epochs pass without a new best loss
    pub fn fit(&mut self, model: &ProbMps, data: &MpsInput) -> Result<Vec<EpochSummary>> {
        let mut summaries = Vec::with_capacity(self.config.epochs);
        for _ in 0..self.config.epochs {
            summaries.push(self.fit_epoch(model, data)?);

            if let Some(patience) = self.config.patience {
                if self.epoch_metrics.has_converged(patience) {
                    info!(epochs = summaries.len(), patience, "stopping early");
                    break;
                }
            }
        }
        Ok(summaries)
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Per-step loss history
    pub fn step_metrics(&self) -> &MetricsTracker {
        &self.step_metrics
    }

    /// Per-epoch mean loss history
    pub fn epoch_metrics(&self) -> &MetricsTracker {
        &self.epoch_metrics
    }
}

/// Sample-weighted mean NLL of `data` without updating the model
pub fn evaluate(model: &ProbMps, data: &MpsInput, batch_size: usize) -> Result<f32> {
    if batch_size == 0 {
        return Err(MpsError::Config("batch_size must be positive".into()));
    }
    let mut total = 0.0f64;
    for (offset, len) in batch_ranges(data.batch_size(), batch_size) {
        let batch = data.narrow_batch(offset, len)?;
        let log_probs = host_values(&model.forward(&batch)?)?;
        total -= log_probs.iter().sum::<f64>();
    }
    Ok((total / data.batch_size().max(1) as f64) as f32)
}

fn batch_ranges(total: usize, batch_size: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..total)
        .step_by(batch_size)
        .map(move |offset| (offset, batch_size.min(total - offset)))
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Safe optimizer step with gradient clipping
///
/// When gradients contain NaN/Inf, the step is skipped and an error is returned.
/// When the global gradient norm exceeds `max_grad_norm`, every gradient in
/// `grads` is scaled by `max_grad_norm / norm` before the optimizer sees it.
///
/// # Arguments
///
/// * `optimizer` - Any Candle optimizer (Adam, SGD, etc.)
/// * `grads` - Gradient store from `loss.backward()`, clipped in place
/// * `vars` - Trainable variables (from `model.trainable_vars()`)
/// * `max_grad_norm` - Maximum allowed gradient norm
///
/// # Returns
///
/// The global gradient norm before clipping.
pub fn safe_optimizer_step<O: CandleOptimizer>(
    optimizer: &mut O,
    grads: &mut GradStore,
    vars: &[Var],
    max_grad_norm: f32,
) -> Result<f32> {
    let total_norm = compute_grad_norm(grads, vars)?;
    if !total_norm.is_finite() {
        return Err(MpsError::Training(
            "NaN detected in gradients - skipping step".into(),
        ));
    }

    if total_norm > max_grad_norm {
        let scale = (max_grad_norm / total_norm) as f64;
        debug!(total_norm, max_grad_norm, "clipping gradients");

        for var in vars {
            let clipped = match grads.get(var.as_tensor()) {
                Some(grad) => grad.affine(scale, 0.0)?,
                None => continue,
            };
            grads.insert(var.as_tensor(), clipped);
        }
    }

    optimizer
        .step(grads)
        .map_err(|e| MpsError::Training(format!("optimizer step failed: {}", e)))?;
    Ok(total_norm)
}

/// Compute the total L2 norm of all gradients
///
/// NaN or Inf in any gradient makes the norm non-finite.
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f64;

    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq_norm = grad.sqr()?.sum_all()?;
            total_sq_norm += host_scalar(&sq_norm)?;
        }
    }

    Ok(total_sq_norm.sqrt() as f32)
}

/// Check if any gradient contains NaN or Inf
///
/// Returns `Ok(true)` if gradients are healthy (no NaN/Inf).
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> Result<bool> {
    Ok(compute_grad_norm(grads, vars)?.is_finite())
}
