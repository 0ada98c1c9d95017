//! Per-site matrix selection from the core tensor

use crate::model::MpsInput;
use crate::primitives::CTensor;
use crate::{MpsError, Result};
use candle_core::{DType, Tensor};

/// Turn a batch of inputs into one matrix per (site, batch entry)
///
/// Discrete inputs pick the core slice `A_t[x_t]` for each symbol; vector
/// inputs contract the input vector against the core's input axis,
/// `sum_i v_t[i] A_t[i]`.
///
/// # Arguments
///
/// * `input` - Discrete `(seq_len, batch)` or vector `(seq_len, batch, input_dim)` inputs
/// * `cores` - Core tensor of shape `(seq_len, input_dim, bond_dim, bond_dim)`
///
/// # Returns
///
/// Matrices of shape `(seq_len, batch, bond_dim, bond_dim)`.
pub fn get_mat_slices(input: &MpsInput, cores: &CTensor) -> Result<CTensor> {
    let (seq_len, input_dim, rows, cols) = cores.re().dims4()?;
    if input.seq_len() != seq_len {
        return Err(MpsError::Input(format!(
            "input has length {}, model expects {}",
            input.seq_len(),
            seq_len
        )));
    }
    let batch = input.batch_size();

    match input {
        MpsInput::Discrete(ids) => {
            let rows_idx = core_row_indices(ids, input_dim)?;
            let rows_idx = Tensor::from_vec(rows_idx, seq_len * batch, cores.device())?;
            cores.map(|c| {
                c.reshape((seq_len * input_dim, rows, cols))?
                    .index_select(&rows_idx, 0)?
                    .reshape((seq_len, batch, rows, cols))
            })
        }
        MpsInput::Vectors(vecs) => {
            let vec_dim = vecs.dim(2)?;
            if vec_dim != input_dim {
                return Err(MpsError::Input(format!(
                    "input vectors have dim {}, model expects {}",
                    vec_dim, input_dim
                )));
            }
            let vecs = CTensor::real(vecs.to_dtype(cores.dtype())?.contiguous()?);
            let flat_cores = cores.map(|c| c.reshape((seq_len, input_dim, rows * cols)))?;
            vecs.matmul(&flat_cores)?
                .map(|m| m.reshape((seq_len, batch, rows, cols)))
        }
    }
}

/// Row of the `(seq_len * input_dim)`-flattened core for every symbol,
/// laid out site-major to match the `(seq_len, batch)` input
fn core_row_indices(ids: &Tensor, input_dim: usize) -> Result<Vec<u32>> {
    let symbols: Vec<Vec<i64>> = match ids.dtype() {
        DType::I64 => ids.to_vec2::<i64>()?,
        DType::U32 => widen(ids.to_vec2::<u32>()?),
        DType::U8 => widen(ids.to_vec2::<u8>()?),
        other => {
            return Err(MpsError::Input(format!(
                "discrete inputs must be u8, u32 or i64, got {:?}",
                other
            )))
        }
    };

    let mut rows = Vec::with_capacity(symbols.iter().map(Vec::len).sum());
    for (t, site) in symbols.iter().enumerate() {
        for &x in site {
            if x < 0 || x as usize >= input_dim {
                return Err(MpsError::Input(format!(
                    "symbol {} at position {} is outside alphabet of size {}",
                    x, t, input_dim
                )));
            }
            rows.push((t * input_dim + x as usize) as u32);
        }
    }
    Ok(rows)
}

fn widen<T: Into<i64>>(rows: Vec<Vec<T>>) -> Vec<Vec<i64>> {
    rows.into_iter()
        .map(|r| r.into_iter().map(Into::into).collect())
        .collect()
}
