//! Log normalization of an MPS

use crate::primitives::CTensor;
use crate::{MpsError, Result};
use candle_core::Tensor;

/// Log of the squared L2 norm of the tensor described by an MPS
///
/// Sums `|alpha^T A_1[x_1] ... A_n[x_n] omega|^2` over every input sequence
/// without enumerating them, by sweeping a bond-space density matrix
/// through the transfer map `rho <- sum_i A_t[i]^H rho A_t[i]`, starting
/// from `rho = conj(alpha) alpha^T` and closing with `omega^H rho omega`.
///
/// `rho` is divided by its Frobenius norm after every site and the log of
/// each scale factor is accumulated, so long chains neither overflow nor
/// underflow.
///
/// # Arguments
///
/// * `cores` - Core tensor of shape `(seq_len, input_dim, bond_dim, bond_dim)`
/// * `edge_vecs` - Boundary vectors `[alpha, omega]` of shape `(2, bond_dim)`
///
/// # Returns
///
/// Real scalar tensor holding `log Z`.
pub fn get_log_norm(cores: &CTensor, edge_vecs: &CTensor) -> Result<Tensor> {
    let (seq_len, _input_dim, rows, cols) = cores.re().dims4()?;
    if rows != cols {
        return Err(MpsError::Tensor(format!(
            "core slices must be square, got {}x{}",
            rows, cols
        )));
    }
    if edge_vecs.dims() != [2, rows] {
        return Err(MpsError::Tensor(format!(
            "edge vectors must have shape [2, {}], got {:?}",
            rows,
            edge_vecs.dims()
        )));
    }
    let bond = rows;

    let left = edge_vecs.map(|v| v.get(0))?;
    let right = edge_vecs.map(|v| v.get(1))?;

    let left_col = left.conj()?.map(|v| v.reshape((bond, 1)))?;
    let left_row = left.map(|v| v.reshape((1, bond)))?;
    let mut dens = left_col.matmul(&left_row)?;
    let mut log_norm = Tensor::zeros((), cores.dtype(), cores.device())?;

    for t in 0..seq_len {
        let core = cores.map(|c| c.get(t))?;
        let half = dens.broadcast_matmul(&core)?;
        dens = core.conj_t()?.matmul(&half)?.map(|m| m.sum(0))?;

        let scale = dens.frobenius_norm()?;
        dens = dens.broadcast_div_real(&scale)?;
        log_norm = (log_norm + scale.log()?)?;
    }

    let right_row = right.conj()?.map(|v| v.reshape((1, bond)))?;
    let right_col = right.map(|v| v.reshape((bond, 1)))?;
    let closing = right_row.matmul(&dens)?.matmul(&right_col)?;

    // log|z| = log(|z|^2) / 2
    let log_closing = (closing.abs_sq()?.log()?.reshape(())? * 0.5)?;
    Ok((log_norm + log_closing)?)
}
