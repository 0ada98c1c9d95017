//! Parameter initializers

use crate::primitives::CTensor;
use crate::{MpsError, Result};
use candle_core::{DType, Device, Tensor};
use std::f64::consts::PI;

/// Default standard deviation of the noise added by [`near_eye_init`]
pub const DEFAULT_INIT_NOISE: f64 = 1e-3;

/// Identity matrices over the last two dims of `shape`, perturbed by Gaussian noise
///
/// Leading dims are broadcast copies of the same (possibly rectangular)
/// identity. In complex mode both the real and imaginary parts get
/// independent noise of standard deviation `noise`.
pub fn near_eye_init(
    shape: &[usize],
    is_complex: bool,
    noise: f64,
    dtype: DType,
    device: &Device,
) -> Result<CTensor> {
    if shape.len() < 2 {
        return Err(MpsError::Config(format!(
            "near_eye_init needs at least two dims, got {:?}",
            shape
        )));
    }
    if !(noise >= 0.0 && noise.is_finite()) {
        return Err(MpsError::Config(format!(
            "init noise must be finite and non-negative, got {}",
            noise
        )));
    }

    let rows = shape[shape.len() - 2];
    let cols = shape[shape.len() - 1];
    let eye: Vec<f32> = (0..rows * cols)
        .map(|k| if k / cols == k % cols { 1.0 } else { 0.0 })
        .collect();
    let eye = Tensor::from_vec(eye, (rows, cols), device)?
        .to_dtype(dtype)?
        .broadcast_as(shape)?
        .contiguous()?;

    let re = (eye + gaussian(shape, noise, dtype, device)?)?;
    if is_complex {
        let im = gaussian(shape, noise, dtype, device)?;
        CTensor::complex(re, im)
    } else {
        Ok(CTensor::real(re))
    }
}

/// Random edge vectors: a `(2, bond_dim)` standard normal draw scaled by `1/sqrt(bond_dim)`
pub fn edge_vec_init(bond_dim: usize, is_complex: bool, dtype: DType, device: &Device) -> Result<CTensor> {
    if bond_dim == 0 {
        return Err(MpsError::Config("bond_dim must be positive".into()));
    }
    let vecs = (Tensor::randn(0f32, 1f32, (2, bond_dim), device)?.to_dtype(dtype)?
        / (bond_dim as f64).sqrt())?;
    if is_complex {
        phaseify(&vecs)
    } else {
        Ok(CTensor::real(vecs))
    }
}

/// Give every entry of a real tensor a uniformly random complex phase
///
/// Magnitudes are preserved: `x -> x * exp(2 pi i u)` with `u ~ U[0, 1)`.
pub fn phaseify(tensor: &Tensor) -> Result<CTensor> {
    let phase = Tensor::rand(0f32, 1f32, tensor.dims(), tensor.device())?
        .to_dtype(tensor.dtype())?
        .affine(2.0 * PI, 0.0)?;
    let re = tensor.mul(&phase.cos()?)?;
    let im = tensor.mul(&phase.sin()?)?;
    CTensor::complex(re, im)
}

fn gaussian(shape: &[usize], std: f64, dtype: DType, device: &Device) -> Result<Tensor> {
    if std == 0.0 {
        return Ok(Tensor::zeros(shape, dtype, device)?);
    }
    Ok(Tensor::randn(0f32, std as f32, shape, device)?.to_dtype(dtype)?)
}
