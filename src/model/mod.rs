//! Probabilistic MPS (Born machine)
//!
//! A fixed-length generative model over sequences. The probability of
//! `x = x_1 x_2 ... x_n` follows the Born rule:
//!
//! ```text
//! P(x) = |alpha^T (A_1[x_1] + B) (A_2[x_2] + B) ... (A_n[x_n] + B) omega|^2 / Z
//! ```
//!
//! where `A_t[i]` is the i'th matrix slice of the t'th core, `B` an
//! optional bias matrix, `alpha` / `omega` trainable edge vectors and `Z`
//! the normalization computed by [`ProbMps::log_norm`].
//!
//! Calling [`ProbMps::forward`] returns **log** probabilities to avoid
//! underflow on long sequences; [`ProbMps::loss`] gives the negative log
//! likelihood of a batch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use prob_mps::prelude::*;
//!
//! let device = best_device();
//! let model = ProbMps::new(ProbMpsConfig::new(8, 2, 4), &device)?;
//!
//! let batch = MpsInput::from_sequences(&[vec![0, 1, 0, 1, 0, 1, 0, 1]], &device)?;
//! let log_probs = model.forward(&batch)?;
//! let loss = model.loss(&batch)?;
//! let grads = loss.backward()?;
//! ```

mod config;
mod input;

pub use config::{Precision, ProbMpsConfig};
pub use input::MpsInput;

use crate::mps_base::{
    contract_matseq, contract_matseq_scaled, edge_vec_init, get_log_norm, get_mat_slices,
    near_eye_init, phaseify, ContractionMode,
};
use crate::primitives::{ensure_finite, host_scalar, host_values, CTensor};
use crate::{MpsError, Result};
use candle_core::{DType, Device, Tensor, Var};
use tracing::{debug, info, warn};

/// Explicit parameter values for [`ProbMps::from_parameters`]
#[derive(Debug, Clone)]
pub struct MpsParams {
    /// Shape `(seq_len, input_dim, bond_dim, bond_dim)`
    pub cores: CTensor,

    /// Shape `(2, bond_dim)`: left then right boundary vector
    pub edge_vecs: CTensor,

    /// Shape `(bond_dim, bond_dim)`
    pub bias: Option<CTensor>,
}

/// A trainable, possibly complex, parameter
#[derive(Debug)]
struct ParamVar {
    re: Var,
    im: Option<Var>,
}

impl ParamVar {
    fn new(value: &CTensor) -> Result<Self> {
        let re = Var::from_tensor(&value.re().copy()?)?;
        let im = match value.im() {
            Some(im) => Some(Var::from_tensor(&im.copy()?)?),
            None => None,
        };
        Ok(Self { re, im })
    }

    fn value(&self) -> Result<CTensor> {
        CTensor::from_parts(
            self.re.as_tensor().clone(),
            self.im.as_ref().map(|v| v.as_tensor().clone()),
        )
    }

    fn vars(&self) -> impl Iterator<Item = &Var> {
        std::iter::once(&self.re).chain(self.im.iter())
    }
}

/// Fixed-length MPS model using L2 (Born rule) probabilities
///
/// Inputs are either batches of discrete sequences, shape `(seq_len, batch)`,
/// or batches of vector sequences, shape `(seq_len, batch, input_dim)`; see
/// [`MpsInput`].
///
/// Dimensions are never stored separately: [`seq_len`](Self::seq_len),
/// [`input_dim`](Self::input_dim) and [`bond_dim`](Self::bond_dim) are read
/// off the core tensor.
#[derive(Debug)]
pub struct ProbMps {
    core_tensors: ParamVar,
    edge_vecs: ParamVar,
    bias_mat: Option<ParamVar>,
    mode: ContractionMode,
}

impl ProbMps {
    /// Create a freshly initialized model
    ///
    /// Cores start near the identity, edge vectors are random normal scaled
    /// by `1/sqrt(bond_dim)`, and the optional bias starts at zero. Complex
    /// edge vectors get random phases.
    pub fn new(config: ProbMpsConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let dtype = config.precision.dtype();
        let complex = config.complex_params;

        let cores = near_eye_init(
            &[config.seq_len, config.input_dim, config.bond_dim, config.bond_dim],
            complex,
            config.init_noise,
            dtype,
            device,
        )?;
        let edge_vecs = edge_vec_init(config.bond_dim, complex, dtype, device)?;
        let bias = if config.use_bias {
            let zeros = Tensor::zeros((config.bond_dim, config.bond_dim), dtype, device)?;
            Some(if complex { phaseify(&zeros)? } else { CTensor::real(zeros) })
        } else {
            None
        };

        let model = Self::from_parameters(
            MpsParams {
                cores,
                edge_vecs,
                bias,
            },
            config.contraction_mode(),
        )?;

        info!(
            seq_len = config.seq_len,
            input_dim = config.input_dim,
            bond_dim = config.bond_dim,
            complex = complex,
            bias = config.use_bias,
            mode = %model.mode,
            params = model.param_count(),
            "initialized ProbMps"
        );
        Ok(model)
    }

    /// Build a model around explicit parameter values
    ///
    /// The values are copied into fresh trainable variables.
    pub fn from_parameters(params: MpsParams, mode: ContractionMode) -> Result<Self> {
        let dims = params.cores.dims();
        if dims.len() != 4 {
            return Err(MpsError::Config(format!(
                "core tensor must have shape (seq_len, input_dim, bond_dim, bond_dim), got {:?}",
                dims
            )));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(MpsError::Config(format!(
                "core tensor dimensions must be positive, got {:?}",
                dims
            )));
        }
        let bond_dim = dims[2];
        if dims[3] != bond_dim {
            return Err(MpsError::Config(format!(
                "core slices must be square, got {}x{}",
                bond_dim, dims[3]
            )));
        }
        if params.edge_vecs.dims() != [2, bond_dim] {
            return Err(MpsError::Config(format!(
                "edge vectors must have shape [2, {}], got {:?}",
                bond_dim,
                params.edge_vecs.dims()
            )));
        }
        if let Some(bias) = &params.bias {
            if bias.dims() != [bond_dim, bond_dim] {
                return Err(MpsError::Config(format!(
                    "bias must have shape [{}, {}], got {:?}",
                    bond_dim,
                    bond_dim,
                    bias.dims()
                )));
            }
        }

        let dtype = params.cores.dtype();
        if !dtype.is_float() {
            return Err(MpsError::Config(format!(
                "parameters must be floating point, got {:?}",
                dtype
            )));
        }
        let other_dtypes = std::iter::once(params.edge_vecs.dtype())
            .chain(params.bias.as_ref().map(CTensor::dtype));
        for other in other_dtypes {
            if other != dtype {
                return Err(MpsError::Config(format!(
                    "parameter dtypes differ: {:?} vs {:?}",
                    dtype, other
                )));
            }
        }

        Ok(Self {
            core_tensors: ParamVar::new(&params.cores)?,
            edge_vecs: ParamVar::new(&params.edge_vecs)?,
            bias_mat: params.bias.as_ref().map(ParamVar::new).transpose()?,
            mode,
        })
    }

    /// Log probabilities of a batch of inputs, shape `(batch,)`
    ///
    /// Computes `2 log|psi(x)| - log Z` for every sequence in the batch.
    /// `log|psi(x)|` is accumulated from a rescaled contraction, so
    /// amplitudes far outside the floating point range of `|psi|^2` are
    /// still scored.
    ///
    /// # Errors
    ///
    /// * [`MpsError::Input`] for inputs that do not fit the model
    /// * [`MpsError::NonFinite`] when the log normalization or any amplitude is NaN / infinite
    /// * [`MpsError::ZeroAmplitude`] when any amplitude is exactly zero
    pub fn forward(&self, input: &MpsInput) -> Result<Tensor> {
        let (psi, log_scale) = self.scaled_amplitudes(input)?;

        let log_norm = self.log_norm()?;
        let log_norm_val = host_scalar(&log_norm)?;
        if !log_norm_val.is_finite() {
            warn!(log_norm = log_norm_val, "non-finite log normalization");
            return Err(MpsError::NonFinite(format!(
                "log normalization is {}",
                log_norm_val
            )));
        }

        let log_abs = psi.log_abs()?.add(&log_scale)?;
        let zeros = host_values(&log_abs)?
            .into_iter()
            .filter(|&v| v == f64::NEG_INFINITY)
            .count();
        if zeros > 0 {
            warn!(count = zeros, "zero amplitudes");
            return Err(MpsError::ZeroAmplitude { count: zeros });
        }
        if let Err(e) = ensure_finite(&log_abs, "log amplitude") {
            warn!("non-finite amplitudes");
            return Err(e);
        }

        Ok(log_abs.affine(2.0, 0.0)?.broadcast_sub(&log_norm)?)
    }

    /// Average negative log likelihood of a batch, a scalar tensor
    pub fn loss(&self, input: &MpsInput) -> Result<Tensor> {
        Ok(self.forward(input)?.mean_all()?.neg()?)
    }

    /// Log of the squared L2 norm of the amplitude tensor, i.e. `log Z`
    ///
    /// Depends only on the parameters. The bias, when present, is added to
    /// every core slice exactly as in [`forward`](Self::forward).
    pub fn log_norm(&self) -> Result<Tensor> {
        let cores = self.effective_cores()?;
        get_log_norm(&cores, &self.edge_vecs.value()?)
    }

    /// Un-normalized amplitudes `psi(x)` of a batch, shape `(batch,)`
    ///
    /// Long or badly scaled chains over- or underflow here; [`forward`](Self::forward)
    /// does not.
    pub fn amplitudes(&self, input: &MpsInput) -> Result<CTensor> {
        let (slices, left, right) = self.site_matrices(input)?;
        contract_matseq(&slices, &left, &right, self.mode)
    }

    fn scaled_amplitudes(&self, input: &MpsInput) -> Result<(CTensor, Tensor)> {
        let (slices, left, right) = self.site_matrices(input)?;
        contract_matseq_scaled(&slices, &left, &right, self.mode)
    }

    /// Per-site matrices `(batch, seq_len, bond, bond)` and both edge vectors
    fn site_matrices(&self, input: &MpsInput) -> Result<(CTensor, CTensor, CTensor)> {
        let mut slices = get_mat_slices(input, &self.core_tensors.value()?)?;
        if let Some(bias) = &self.bias_mat {
            slices = slices.broadcast_add(&bias.value()?)?;
        }
        // batch axis first
        let slices = slices.map(|s| s.transpose(0, 1)?.contiguous())?;

        let edges = self.edge_vecs.value()?;
        let left = edges.map(|v| v.get(0))?;
        let right = edges.map(|v| v.get(1))?;
        debug!(batch = input.batch_size(), mode = %self.mode, "evaluating amplitudes");
        Ok((slices, left, right))
    }

    fn effective_cores(&self) -> Result<CTensor> {
        let cores = self.core_tensors.value()?;
        match &self.bias_mat {
            Some(bias) => cores.broadcast_add(&bias.value()?),
            None => Ok(cores),
        }
    }

    pub fn seq_len(&self) -> usize {
        self.core_tensors.re.dims()[0]
    }

    pub fn input_dim(&self) -> usize {
        self.core_tensors.re.dims()[1]
    }

    pub fn bond_dim(&self) -> usize {
        self.core_tensors.re.dims()[2]
    }

    pub fn use_bias(&self) -> bool {
        self.bias_mat.is_some()
    }

    pub fn complex_params(&self) -> bool {
        self.core_tensors.im.is_some()
    }

    pub fn contraction_mode(&self) -> ContractionMode {
        self.mode
    }

    pub fn set_contraction_mode(&mut self, mode: ContractionMode) {
        self.mode = mode;
    }

    pub fn device(&self) -> &Device {
        self.core_tensors.re.device()
    }

    pub fn dtype(&self) -> DType {
        self.core_tensors.re.dtype()
    }

    /// Current parameter values
    pub fn parameters(&self) -> Result<MpsParams> {
        Ok(MpsParams {
            cores: self.core_tensors.value()?,
            edge_vecs: self.edge_vecs.value()?,
            bias: self.bias_mat.as_ref().map(ParamVar::value).transpose()?,
        })
    }

    /// Trainable variables for an optimizer
    ///
    /// Order: cores, edge vectors, bias; real part before imaginary part.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.core_tensors
            .vars()
            .chain(self.edge_vecs.vars())
            .chain(self.bias_mat.iter().flat_map(|b| b.vars()))
            .cloned()
            .collect()
    }

    /// Total number of trainable scalars
    pub fn param_count(&self) -> usize {
        self.trainable_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Check if any trainable variable contains NaN or Inf
    ///
    /// Returns `Some((var_index, issue))` for the first problem found,
    /// indexing into [`trainable_vars`](Self::trainable_vars). A variable
    /// that cannot be read back is reported as an error.
    pub fn check_params_health(&self) -> Result<Option<(usize, &'static str)>> {
        for (i, var) in self.trainable_vars().iter().enumerate() {
            for v in host_values(var.as_tensor())? {
                if v.is_nan() {
                    return Ok(Some((i, "NaN")));
                }
                if v.is_infinite() {
                    return Ok(Some((i, "Infinite")));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::host_values;
    use proptest::prelude::*;

    fn device() -> Device {
        Device::Cpu
    }

    fn all_sequences(seq_len: usize, input_dim: usize) -> Vec<Vec<u32>> {
        let total = input_dim.pow(seq_len as u32);
        (0..total)
            .map(|mut k| {
                (0..seq_len)
                    .map(|_| {
                        let x = (k % input_dim) as u32;
                        k /= input_dim;
                        x
                    })
                    .collect()
            })
            .collect()
    }

    fn randn(shape: &[usize], std: f64) -> Tensor {
        Tensor::randn(0f64, std, shape, &device()).unwrap()
    }

    fn random_params(seq_len: usize, input_dim: usize, bond: usize, complex: bool, bias: bool) -> MpsParams {
        let part = |shape: &[usize], std: f64| -> CTensor {
            if complex {
                CTensor::complex(randn(shape, std), randn(shape, std)).unwrap()
            } else {
                CTensor::real(randn(shape, std))
            }
        };
        MpsParams {
            cores: part(&[seq_len, input_dim, bond, bond], 0.8),
            edge_vecs: part(&[2, bond], 1.0),
            bias: bias.then(|| part(&[bond, bond], 0.3)),
        }
    }

    fn f64_model(config: ProbMpsConfig) -> ProbMps {
        ProbMps::new(config.with_precision(Precision::F64), &device()).unwrap()
    }

    fn total_probability(model: &ProbMps) -> f64 {
        let seqs = all_sequences(model.seq_len(), model.input_dim());
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();
        let log_probs = host_values(&model.forward(&input).unwrap()).unwrap();
        log_probs.iter().map(|lp| lp.exp()).sum()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn construction_reports_dimensions(
            seq_len in 1usize..6,
            input_dim in 1usize..5,
            bond_dim in 1usize..5,
            complex in any::<bool>(),
            bias in any::<bool>(),
        ) {
            let config = ProbMpsConfig::new(seq_len, input_dim, bond_dim)
                .with_complex_params(complex)
                .with_bias(bias);
            let model = ProbMps::new(config, &device()).unwrap();

            prop_assert_eq!(model.seq_len(), seq_len);
            prop_assert_eq!(model.input_dim(), input_dim);
            prop_assert_eq!(model.bond_dim(), bond_dim);
            prop_assert_eq!(model.use_bias(), bias);
            prop_assert_eq!(model.complex_params(), complex);
        }
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        for (s, i, b) in [(0, 2, 2), (2, 0, 2), (2, 2, 0)] {
            let result = ProbMps::new(ProbMpsConfig::new(s, i, b), &device());
            assert!(matches!(result, Err(MpsError::Config(_))));
        }
    }

    #[test]
    fn test_forward_returns_one_log_prob_per_sequence() {
        let model = ProbMps::new(ProbMpsConfig::new(6, 3, 4), &device()).unwrap();
        let seqs: Vec<Vec<u32>> = (0..5).map(|b| (0..6).map(|t| (b + t) % 3).collect()).collect();
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();

        let log_probs = model.forward(&input).unwrap();
        assert_eq!(log_probs.dims(), &[5]);
        assert_eq!(log_probs.dtype(), DType::F32);
        let vals = host_values(&log_probs).unwrap();
        assert!(vals.iter().all(|v| v.is_finite() && *v <= 1e-4));
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let real = f64_model(ProbMpsConfig::new(3, 2, 3).with_init_noise(0.3));
        assert!((total_probability(&real) - 1.0).abs() < 1e-9);

        let complex = f64_model(
            ProbMpsConfig::new(3, 3, 2)
                .with_init_noise(0.3)
                .with_complex_params(true),
        );
        assert!((total_probability(&complex) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_random_parameters_normalized() {
        for (complex, bias) in [(false, false), (false, true), (true, false), (true, true)] {
            let params = random_params(4, 2, 3, complex, bias);
            let model = ProbMps::from_parameters(params, ContractionMode::Sequential).unwrap();
            let total = total_probability(&model);
            assert!((total - 1.0).abs() < 1e-8, "complex={} bias={} total={}", complex, bias, total);
        }
    }

    #[test]
    fn test_log_norm_matches_enumeration() {
        let params = random_params(3, 3, 2, true, true);
        let model = ProbMps::from_parameters(params, ContractionMode::Sequential).unwrap();

        let seqs = all_sequences(3, 3);
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();
        let amps = model.amplitudes(&input).unwrap();
        let brute: f64 = host_values(&amps.abs_sq().unwrap()).unwrap().iter().sum();

        let log_norm = host_scalar(&model.log_norm().unwrap()).unwrap();
        assert!((log_norm - brute.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_loss_is_negative_mean_log_prob() {
        let model = ProbMps::new(ProbMpsConfig::new(5, 2, 3).with_bias(true), &device()).unwrap();
        let seqs = vec![vec![0, 1, 0, 1, 1], vec![1, 1, 1, 0, 0], vec![0, 0, 0, 0, 0]];
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();

        let log_probs = host_values(&model.forward(&input).unwrap()).unwrap();
        let loss = host_scalar(&model.loss(&input).unwrap()).unwrap();
        let expected = -log_probs.iter().sum::<f64>() / log_probs.len() as f64;
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_log_norm_independent_of_input() {
        let model = ProbMps::new(ProbMpsConfig::new(4, 2, 2), &device()).unwrap();
        let before = host_scalar(&model.log_norm().unwrap()).unwrap();

        let input = MpsInput::from_sequences(&[vec![1, 0, 1, 0]], &device()).unwrap();
        model.forward(&input).unwrap();
        let after = host_scalar(&model.log_norm().unwrap()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_bias_matches_shifted_cores() {
        let params = random_params(4, 3, 3, true, true);
        let bias = params.bias.clone().unwrap();
        let biased = ProbMps::from_parameters(params.clone(), ContractionMode::Sequential).unwrap();

        let shifted = MpsParams {
            cores: params.cores.broadcast_add(&bias).unwrap(),
            edge_vecs: params.edge_vecs.clone(),
            bias: None,
        };
        let unbiased = ProbMps::from_parameters(shifted, ContractionMode::Sequential).unwrap();

        let seqs = vec![vec![0, 1, 2, 1], vec![2, 2, 0, 0]];
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();
        let a = host_values(&biased.forward(&input).unwrap()).unwrap();
        let b = host_values(&unbiased.forward(&input).unwrap()).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-9);
        }

        let na = host_scalar(&biased.log_norm().unwrap()).unwrap();
        let nb = host_scalar(&unbiased.log_norm().unwrap()).unwrap();
        assert!((na - nb).abs() < 1e-9);
    }

    #[test]
    fn test_zero_bias_is_neutral() {
        let mut params = random_params(3, 2, 2, false, false);
        let plain = ProbMps::from_parameters(params.clone(), ContractionMode::Sequential).unwrap();
        params.bias = Some(CTensor::real(Tensor::zeros((2, 2), DType::F64, &device()).unwrap()));
        let biased = ProbMps::from_parameters(params, ContractionMode::Sequential).unwrap();

        let input = MpsInput::from_sequences(&all_sequences(3, 2), &device()).unwrap();
        let a = host_values(&plain.forward(&input).unwrap()).unwrap();
        let b = host_values(&biased.forward(&input).unwrap()).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        for complex in [false, true] {
            let params = random_params(7, 3, 3, complex, true);
            let mut model = ProbMps::from_parameters(params, ContractionMode::Sequential).unwrap();
            let seqs: Vec<Vec<u32>> = (0..6).map(|b| (0..7).map(|t| ((b * t + 1) % 3) as u32).collect()).collect();
            let input = MpsInput::from_sequences(&seqs, &device()).unwrap();

            let seq = host_values(&model.forward(&input).unwrap()).unwrap();
            model.set_contraction_mode(ContractionMode::Parallel);
            assert_eq!(model.contraction_mode(), ContractionMode::Parallel);
            let par = host_values(&model.forward(&input).unwrap()).unwrap();

            for (x, y) in seq.iter().zip(&par) {
                assert!((x - y).abs() < 1e-9, "{} vs {}", x, y);
            }
        }
    }

    #[test]
    fn test_parallel_eval_config_f32() {
        let seq_model = ProbMps::new(ProbMpsConfig::new(9, 2, 3).with_init_noise(0.2), &device()).unwrap();
        let par_model = ProbMps::from_parameters(seq_model.parameters().unwrap(), ContractionMode::Parallel).unwrap();

        let input = MpsInput::from_sequences(&all_sequences(9, 2)[..32], &device()).unwrap();
        let a = host_values(&seq_model.forward(&input).unwrap()).unwrap();
        let b = host_values(&par_model.forward(&input).unwrap()).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-3 * (1.0 + x.abs()));
        }
    }

    #[test]
    fn test_one_hot_vectors_match_discrete() {
        let params = random_params(3, 3, 2, true, true);
        let model = ProbMps::from_parameters(params, ContractionMode::Sequential).unwrap();

        let seqs = vec![vec![0u32, 2, 1], vec![1, 1, 0]];
        let discrete = MpsInput::from_sequences(&seqs, &device()).unwrap();

        let mut one_hot = vec![0f64; 3 * 2 * 3];
        for (b, seq) in seqs.iter().enumerate() {
            for (t, &x) in seq.iter().enumerate() {
                one_hot[(t * 2 + b) * 3 + x as usize] = 1.0;
            }
        }
        let vectors = MpsInput::vectors(Tensor::from_vec(one_hot, (3, 2, 3), &device()).unwrap()).unwrap();

        let a = host_values(&model.forward(&discrete).unwrap()).unwrap();
        let b = host_values(&model.forward(&vectors).unwrap()).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    /// Every core slice is `scale * I`, edges `e_0`: each of the
    /// `input_dim^seq_len` sequences has amplitude `scale^seq_len`, so the
    /// model is uniform whatever the scale
    fn uniform_model(
        seq_len: usize,
        input_dim: usize,
        bond: usize,
        scale: f32,
        mode: ContractionMode,
    ) -> ProbMps {
        let cores = Tensor::eye(bond, DType::F32, &device())
            .unwrap()
            .affine(scale as f64, 0.0)
            .unwrap()
            .reshape((1, 1, bond, bond))
            .unwrap()
            .broadcast_as((seq_len, input_dim, bond, bond))
            .unwrap()
            .contiguous()
            .unwrap();
        let mut edges = vec![0f32; 2 * bond];
        edges[0] = 1.0;
        edges[bond] = 1.0;
        let edges = Tensor::from_vec(edges, (2, bond), &device()).unwrap();
        ProbMps::from_parameters(
            MpsParams {
                cores: CTensor::real(cores),
                edge_vecs: CTensor::real(edges),
                bias: None,
            },
            mode,
        )
        .unwrap()
    }

    #[test]
    fn test_forward_beyond_squared_f32_range() {
        // 1.8^80 ~ 2.9e20 and 0.5^80 ~ 8.3e-25 are normal f32 values,
        // their squares are not
        let expected = -80.0 * 2f64.ln();
        let seqs: Vec<Vec<u32>> = (0..4).map(|b| (0..80).map(|t| ((b + t) % 3 % 2) as u32).collect()).collect();
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();

        for scale in [1.8f32, 0.5, 3.0, 0.1] {
            for bond in [1, 2] {
                for mode in [ContractionMode::Sequential, ContractionMode::Parallel] {
                    let model = uniform_model(80, 2, bond, scale, mode);
                    let log_probs = host_values(&model.forward(&input).unwrap()).unwrap();
                    assert_eq!(log_probs.len(), 4);
                    for lp in log_probs {
                        assert!(
                            (lp - expected).abs() < 1e-2,
                            "scale={} bond={} mode={}: {} vs {}",
                            scale,
                            bond,
                            mode,
                            lp,
                            expected
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_loss_beyond_squared_f32_range_backpropagates() {
        let model = uniform_model(80, 2, 2, 1.8, ContractionMode::Sequential);
        let input = MpsInput::from_sequences(&[vec![1; 80]], &device()).unwrap();

        let loss = model.loss(&input).unwrap();
        assert!((host_scalar(&loss).unwrap() - 80.0 * 2f64.ln()).abs() < 1e-2);
        let grads = loss.backward().unwrap();
        for var in model.trainable_vars() {
            let grad = host_values(grads.get(var.as_tensor()).unwrap()).unwrap();
            assert!(grad.iter().all(|g| g.is_finite()));
        }
    }

    #[test]
    fn test_zero_amplitude_is_an_error() {
        // bond 1: symbol 0 maps to 1, symbol 1 maps to 0
        let cores = Tensor::from_vec(vec![1.0f64, 0.0, 1.0, 0.0], (2, 2, 1, 1), &device()).unwrap();
        let edges = Tensor::from_vec(vec![1.0f64, 1.0], (2, 1), &device()).unwrap();
        let model = ProbMps::from_parameters(
            MpsParams {
                cores: CTensor::real(cores),
                edge_vecs: CTensor::real(edges),
                bias: None,
            },
            ContractionMode::Sequential,
        )
        .unwrap();

        let ok = MpsInput::from_sequences(&[vec![0, 0]], &device()).unwrap();
        let lp = host_values(&model.forward(&ok).unwrap()).unwrap();
        assert!(lp[0].abs() < 1e-12);

        let bad = MpsInput::from_sequences(&[vec![0, 0], vec![0, 1], vec![1, 1]], &device()).unwrap();
        match model.forward(&bad) {
            Err(MpsError::ZeroAmplitude { count }) => assert_eq!(count, 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_parameters_are_an_error() {
        let mut params = random_params(2, 2, 2, false, false);
        let mut vals = host_values(params.cores.re()).unwrap();
        vals[3] = f64::NAN;
        params.cores = CTensor::real(Tensor::from_vec(vals, (2, 2, 2, 2), &device()).unwrap());
        let model = ProbMps::from_parameters(params, ContractionMode::Sequential).unwrap();

        assert_eq!(model.check_params_health().unwrap(), Some((0, "NaN")));
        let input = MpsInput::from_sequences(&[vec![0, 1]], &device()).unwrap();
        assert!(matches!(model.forward(&input), Err(MpsError::NonFinite(_))));
    }

    #[test]
    fn test_wrong_input_rejected() {
        let model = ProbMps::new(ProbMpsConfig::new(3, 2, 2), &device()).unwrap();

        let short = MpsInput::from_sequences(&[vec![0, 1]], &device()).unwrap();
        assert!(matches!(model.forward(&short), Err(MpsError::Input(_))));

        let out_of_range = MpsInput::from_sequences(&[vec![0, 1, 2]], &device()).unwrap();
        assert!(matches!(model.forward(&out_of_range), Err(MpsError::Input(_))));

        let wide = MpsInput::vectors(Tensor::zeros((3, 1, 5), DType::F32, &device()).unwrap()).unwrap();
        assert!(matches!(model.forward(&wide), Err(MpsError::Input(_))));
    }

    #[test]
    fn test_from_parameters_validates_shapes() {
        let good = random_params(2, 2, 3, false, true);

        let mut bad_edges = good.clone();
        bad_edges.edge_vecs = CTensor::real(randn(&[2, 2], 1.0));
        assert!(ProbMps::from_parameters(bad_edges, ContractionMode::Sequential).is_err());

        let mut bad_bias = good.clone();
        bad_bias.bias = Some(CTensor::real(randn(&[3, 2], 1.0)));
        assert!(ProbMps::from_parameters(bad_bias, ContractionMode::Sequential).is_err());

        let mut bad_cores = good.clone();
        bad_cores.cores = CTensor::real(randn(&[2, 2, 3, 2], 1.0));
        assert!(ProbMps::from_parameters(bad_cores, ContractionMode::Sequential).is_err());

        let mut mixed_dtype = good;
        mixed_dtype.edge_vecs = mixed_dtype.edge_vecs.map(|t| t.to_dtype(DType::F32)).unwrap();
        assert!(ProbMps::from_parameters(mixed_dtype, ContractionMode::Sequential).is_err());
    }

    #[test]
    fn test_trainable_vars_and_param_count() {
        let real = ProbMps::new(ProbMpsConfig::new(4, 2, 3), &device()).unwrap();
        assert_eq!(real.trainable_vars().len(), 2);
        assert_eq!(real.param_count(), 4 * 2 * 9 + 2 * 3);

        let full = ProbMps::new(
            ProbMpsConfig::new(4, 2, 3).with_complex_params(true).with_bias(true),
            &device(),
        )
        .unwrap();
        assert_eq!(full.trainable_vars().len(), 6);
        assert_eq!(full.param_count(), 2 * (4 * 2 * 9 + 2 * 3 + 9));
        assert!(full.check_params_health().unwrap().is_none());
    }

    #[test]
    fn test_loss_backpropagates_to_every_parameter() {
        let model = ProbMps::new(
            ProbMpsConfig::new(3, 2, 2).with_complex_params(true).with_bias(true),
            &device(),
        )
        .unwrap();
        let input = MpsInput::from_sequences(&[vec![0, 1, 1], vec![1, 0, 0]], &device()).unwrap();

        let grads = model.loss(&input).unwrap().backward().unwrap();
        for var in model.trainable_vars() {
            let grad = grads.get(var.as_tensor()).expect("missing gradient");
            assert_eq!(grad.dims(), var.dims());
        }
    }
}
