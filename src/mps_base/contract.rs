//! Contraction of matrix sequences against boundary vectors

use crate::primitives::CTensor;
use crate::{MpsError, Result};
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Strategy for multiplying out a sequence of matrices
///
/// Both strategies produce the same amplitudes up to floating point error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractionMode {
    /// Sweep a row vector through the chain, one matrix-vector product per site.
    /// Least total work, `seq_len` dependent steps.
    #[default]
    Sequential,

    /// Multiply adjacent pairs of matrices until one remains.
    /// More total work, but only `ceil(log2(seq_len))` dependent steps.
    Parallel,
}

impl std::fmt::Display for ContractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Contract batches of matrix sequences with left and right boundary vectors
///
/// # Arguments
///
/// * `mats` - Matrices of shape `(batch, seq_len, left_dim, right_dim)`
/// * `left` - Left boundary vector of shape `(left_dim,)`
/// * `right` - Right boundary vector of shape `(right_dim,)`
/// * `mode` - Contraction strategy
///
/// # Returns
///
/// Amplitudes `left^T M_1 M_2 ... M_n right`, shape `(batch,)`. Long chains
/// can leave the floating point range here; use [`contract_matseq_scaled`]
/// when only `log|psi|` is needed.
pub fn contract_matseq(
    mats: &CTensor,
    left: &CTensor,
    right: &CTensor,
    mode: ContractionMode,
) -> Result<CTensor> {
    let (amps, log_scale) = contract_matseq_scaled(mats, left, right, mode)?;
    let scale = log_scale.exp()?;
    amps.map(|a| a.mul(&scale))
}

/// Like [`contract_matseq`], with the magnitude split off
///
/// Returns `(amps, log_scale)`, both of shape `(batch,)`, where the true
/// amplitude is `amps * exp(log_scale)`. The intermediate state is divided by
/// its norm after every product, so `amps` stays of order
/// `|left| |right|` however long the chain is.
pub fn contract_matseq_scaled(
    mats: &CTensor,
    left: &CTensor,
    right: &CTensor,
    mode: ContractionMode,
) -> Result<(CTensor, Tensor)> {
    let (batch, seq_len, left_dim, right_dim) = mats.re().dims4()?;
    if seq_len == 0 {
        return Err(MpsError::Input("cannot contract an empty matrix sequence".into()));
    }
    if left.dims() != [left_dim] || right.dims() != [right_dim] {
        return Err(MpsError::Tensor(format!(
            "boundary vectors {:?} / {:?} do not fit matrices {:?}",
            left.dims(),
            right.dims(),
            mats.dims()
        )));
    }
    if seq_len > 1 && left_dim != right_dim {
        return Err(MpsError::Tensor(format!(
            "chained matrices must be square, got {}x{}",
            left_dim, right_dim
        )));
    }
    debug!(batch, seq_len, %mode, "contracting matrix sequence");

    let right_col = right.map(|v| v.reshape((right_dim, 1)))?;
    let (amps, log_scale) = match mode {
        ContractionMode::Sequential => {
            let mut state = left.map(|v| {
                v.reshape((1, 1, left_dim))?
                    .broadcast_as((batch, 1, left_dim))?
                    .contiguous()
            })?;
            let mut log_scale = Tensor::zeros(batch, mats.dtype(), mats.device())?;
            for t in 0..seq_len {
                let mat = mats.map(|m| m.narrow(1, t, 1)?.squeeze(1)?.contiguous())?;
                let (next, log_norm) = rescale(&state.matmul(&mat)?)?;
                state = next;
                log_scale = log_scale.add(&log_norm)?;
            }
            (state.broadcast_matmul(&right_col)?, log_scale)
        }
        ContractionMode::Parallel => {
            let (product, log_scale) = tree_product(mats)?;
            let left_row = left.map(|v| v.reshape((1, left_dim)))?;
            let amps = left_row
                .broadcast_matmul(&product)?
                .broadcast_matmul(&right_col)?;
            (amps, log_scale)
        }
    };
    Ok((amps.map(|a| a.reshape(batch))?, log_scale))
}

/// Divide every trailing matrix by its Frobenius norm
///
/// `(.., rows, cols)` -> rescaled matrices and log norms of shape `(..)`.
/// All-zero matrices are left untouched and contribute a log norm of 0.
fn rescale(mats: &CTensor) -> Result<(CTensor, Tensor)> {
    let rank = mats.dims().len();
    let norm = mats
        .abs_sq()?
        .sum_keepdim(rank - 1)?
        .sum_keepdim(rank - 2)?
        .sqrt()?;
    let norm = norm.add(&norm.eq(0.0)?.to_dtype(norm.dtype())?)?;
    let scaled = mats.broadcast_div_real(&norm)?;
    let log_norm = norm.log()?.squeeze(rank - 1)?.squeeze(rank - 2)?;
    Ok((scaled, log_norm))
}

/// Product of each batch entry's matrix sequence by pairwise reduction,
/// `(batch, n, d, d)` -> `(batch, d, d)` plus the accumulated log scale
/// of shape `(batch,)`
fn tree_product(mats: &CTensor) -> Result<(CTensor, Tensor)> {
    let (batch, mut len, rows, cols) = mats.re().dims4()?;
    let (mut current, log_norms) = rescale(mats)?;
    let mut log_scale = log_norms.sum(1)?;

    while len > 1 {
        let pairs = len / 2;
        let paired = current.map(|m| m.narrow(1, 0, 2 * pairs)?.reshape((batch, pairs, 2, rows, cols)))?;
        let lhs = paired.map(|m| m.narrow(2, 0, 1)?.squeeze(2)?.contiguous())?;
        let rhs = paired.map(|m| m.narrow(2, 1, 1)?.squeeze(2)?.contiguous())?;
        let (mut next, log_norms) = rescale(&lhs.matmul(&rhs)?)?;
        log_scale = log_scale.add(&log_norms.sum(1)?)?;

        // odd leftover rides along to the next round
        if len % 2 == 1 {
            let tail = current.map(|m| m.narrow(1, len - 1, 1))?;
            next = CTensor::cat(&[&next, &tail], 1)?;
        }

        current = next;
        len = pairs + len % 2;
    }

    Ok((current.map(|m| m.squeeze(1))?, log_scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::host_values;
    use candle_core::{DType, Device, Tensor};

    fn device() -> Device {
        Device::Cpu
    }

    fn random_mats(batch: usize, len: usize, dim: usize) -> Tensor {
        Tensor::randn(0f64, 0.7, (batch, len, dim, dim), &device()).unwrap()
    }

    fn random_vec(dim: usize) -> Tensor {
        Tensor::randn(0f64, 1.0, dim, &device()).unwrap()
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-9 * (1.0 + x.abs()), "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_sequential_matches_explicit_product() {
        // M_1 = [[1, 2], [0, 1]], M_2 = [[0, 1], [1, 0]], left = [1, 1], right = [1, 0]
        let mats = Tensor::from_vec(vec![1.0f64, 2.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0], (1, 2, 2, 2), &device()).unwrap();
        let left = CTensor::real(Tensor::from_vec(vec![1.0f64, 1.0], 2, &device()).unwrap());
        let right = CTensor::real(Tensor::from_vec(vec![1.0f64, 0.0], 2, &device()).unwrap());

        // [1, 1] M_1 = [1, 3]; [1, 3] M_2 = [3, 1]; [3, 1] . [1, 0] = 3
        let amp = contract_matseq(&CTensor::real(mats), &left, &right, ContractionMode::Sequential).unwrap();
        assert_eq!(amp.dims(), &[1]);
        assert_close(&host_values(amp.re()).unwrap(), &[3.0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        for len in [1, 2, 3, 5, 8, 11] {
            let mats = CTensor::real(random_mats(4, len, 3));
            let left = CTensor::real(random_vec(3));
            let right = CTensor::real(random_vec(3));

            let seq = contract_matseq(&mats, &left, &right, ContractionMode::Sequential).unwrap();
            let par = contract_matseq(&mats, &left, &right, ContractionMode::Parallel).unwrap();
            assert_eq!(par.dims(), &[4]);
            assert_close(&host_values(seq.re()).unwrap(), &host_values(par.re()).unwrap());
        }
    }

    #[test]
    fn test_parallel_matches_sequential_complex() {
        let mats = CTensor::complex(random_mats(2, 7, 2), random_mats(2, 7, 2)).unwrap();
        let left = CTensor::complex(random_vec(2), random_vec(2)).unwrap();
        let right = CTensor::real(random_vec(2));

        let seq = contract_matseq(&mats, &left, &right, ContractionMode::Sequential).unwrap();
        let par = contract_matseq(&mats, &left, &right, ContractionMode::Parallel).unwrap();
        assert_close(&host_values(seq.re()).unwrap(), &host_values(par.re()).unwrap());
        assert_close(
            &host_values(seq.im().unwrap()).unwrap(),
            &host_values(par.im().unwrap()).unwrap(),
        );
    }

    #[test]
    fn test_scaled_contraction_survives_long_chains() {
        // 200 copies of 3 * I: |psi| = 3^200, far beyond f32
        let mats = Tensor::eye(2, DType::F32, &device())
            .unwrap()
            .affine(3.0, 0.0)
            .unwrap()
            .reshape((1, 1, 2, 2))
            .unwrap()
            .broadcast_as((2, 200, 2, 2))
            .unwrap()
            .contiguous()
            .unwrap();
        let mats = CTensor::real(mats);
        let left = CTensor::real(Tensor::new(&[1f32, 0.0], &device()).unwrap());
        let right = CTensor::real(Tensor::new(&[-1f32, 0.0], &device()).unwrap());

        for mode in [ContractionMode::Sequential, ContractionMode::Parallel] {
            let (amps, log_scale) = contract_matseq_scaled(&mats, &left, &right, mode).unwrap();
            let log_abs = host_values(&amps.log_abs().unwrap().add(&log_scale).unwrap()).unwrap();
            let signs = host_values(amps.re()).unwrap();
            for (log, sign) in log_abs.iter().zip(signs) {
                assert!((log - 200.0 * 3f64.ln()).abs() < 1e-2, "{}: {}", mode, log);
                assert!(sign < 0.0);
            }
        }
    }

    #[test]
    fn test_scaled_contraction_of_zero_chain() {
        let mut data = vec![1f64, 0.0, 0.0, 1.0];
        data.extend([0.0; 4]);
        data.extend([1.0, 0.0, 0.0, 1.0]);
        let mats = CTensor::real(Tensor::from_vec(data, (1, 3, 2, 2), &device()).unwrap());
        let ones = CTensor::real(Tensor::new(&[1f64, 1.0], &device()).unwrap());

        for mode in [ContractionMode::Sequential, ContractionMode::Parallel] {
            let (amps, log_scale) = contract_matseq_scaled(&mats, &ones, &ones, mode).unwrap();
            assert_eq!(host_values(amps.re()).unwrap(), vec![0.0]);
            assert!(host_values(&log_scale).unwrap()[0].is_finite());
        }
    }

    #[test]
    fn test_boundary_mismatch_rejected() {
        let mats = CTensor::real(Tensor::zeros((1, 2, 3, 3), DType::F32, &device()).unwrap());
        let short = CTensor::real(Tensor::zeros(2, DType::F32, &device()).unwrap());
        let ok = CTensor::real(Tensor::zeros(3, DType::F32, &device()).unwrap());
        assert!(contract_matseq(&mats, &short, &ok, ContractionMode::Sequential).is_err());
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&ContractionMode::Parallel).unwrap();
        assert_eq!(json, "\"parallel\"");
        let parsed: ContractionMode = serde_json::from_str("\"sequential\"").unwrap();
        assert_eq!(parsed, ContractionMode::Sequential);
    }
}
