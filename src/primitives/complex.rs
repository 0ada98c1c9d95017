//! Split-complex tensors
//!
//! candle has no complex dtype, so complex values are carried as a pair of
//! real tensors. [`CTensor`] holds a real part and an optional imaginary
//! part; a missing imaginary part means the value is purely real and every
//! operation then reduces to a single real tensor op.
//!
//! All operations are built from differentiable candle ops, so gradients
//! flow back into both parts.

use crate::{MpsError, Result};
use candle_core::{DType, Device, Tensor};

/// A real tensor with an optional imaginary part
#[derive(Debug, Clone)]
pub struct CTensor {
    re: Tensor,
    im: Option<Tensor>,
}

impl CTensor {
    /// Wrap a real tensor
    pub fn real(re: Tensor) -> Self {
        Self { re, im: None }
    }

    /// Build a complex tensor from matching real and imaginary parts
    pub fn complex(re: Tensor, im: Tensor) -> Result<Self> {
        if re.dims() != im.dims() {
            return Err(MpsError::Tensor(format!(
                "real/imaginary shape mismatch: {:?} vs {:?}",
                re.dims(),
                im.dims()
            )));
        }
        if re.dtype() != im.dtype() {
            return Err(MpsError::Tensor(format!(
                "real/imaginary dtype mismatch: {:?} vs {:?}",
                re.dtype(),
                im.dtype()
            )));
        }
        Ok(Self { re, im: Some(im) })
    }

    /// Build from a real part and an optional imaginary part
    pub fn from_parts(re: Tensor, im: Option<Tensor>) -> Result<Self> {
        match im {
            Some(im) => Self::complex(re, im),
            None => Ok(Self::real(re)),
        }
    }

    pub fn re(&self) -> &Tensor {
        &self.re
    }

    pub fn im(&self) -> Option<&Tensor> {
        self.im.as_ref()
    }

    pub fn is_complex(&self) -> bool {
        self.im.is_some()
    }

    pub fn dims(&self) -> &[usize] {
        self.re.dims()
    }

    pub fn dtype(&self) -> DType {
        self.re.dtype()
    }

    pub fn device(&self) -> &Device {
        self.re.device()
    }

    /// Apply a real-linear op (reshape, narrow, index_select, ...) to both parts
    pub fn map<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&Tensor) -> candle_core::Result<Tensor>,
    {
        let re = f(&self.re)?;
        let im = match &self.im {
            Some(im) => Some(f(im)?),
            None => None,
        };
        Ok(Self { re, im })
    }

    /// Expand a bilinear real op to split-complex operands:
    /// `(a + ib) op (c + id) = (a op c - b op d) + i(a op d + b op c)`
    fn bilinear<F>(&self, rhs: &Self, f: F) -> Result<Self>
    where
        F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
    {
        let re_re = f(&self.re, &rhs.re)?;
        match (&self.im, &rhs.im) {
            (None, None) => Ok(Self::real(re_re)),
            (Some(ai), None) => Ok(Self {
                re: re_re,
                im: Some(f(ai, &rhs.re)?),
            }),
            (None, Some(bi)) => Ok(Self {
                re: re_re,
                im: Some(f(&self.re, bi)?),
            }),
            (Some(ai), Some(bi)) => {
                let re = (re_re - f(ai, bi)?)?;
                let im = (f(&self.re, bi)? + f(ai, &rhs.re)?)?;
                Ok(Self { re, im: Some(im) })
            }
        }
    }

    /// Sum two operands part by part with a real additive op
    fn additive<F>(&self, rhs: &Self, f: F) -> Result<Self>
    where
        F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
    {
        let re = f(&self.re, &rhs.re)?;
        let im = match (&self.im, &rhs.im) {
            (None, None) => None,
            (Some(ai), None) => Some(f(ai, &rhs.re.zeros_like()?)?),
            (None, Some(bi)) => Some(f(&self.re.zeros_like()?, bi)?),
            (Some(ai), Some(bi)) => Some(f(ai, bi)?),
        };
        Ok(Self { re, im })
    }

    /// Concatenate along `dim`; purely real pieces get a zero imaginary part
    /// when any piece is complex
    pub fn cat(parts: &[&CTensor], dim: usize) -> Result<Self> {
        let re: Vec<&Tensor> = parts.iter().map(|p| &p.re).collect();
        let re = Tensor::cat(&re, dim)?;
        if !parts.iter().any(|p| p.is_complex()) {
            return Ok(Self::real(re));
        }
        let im = parts
            .iter()
            .map(|p| match &p.im {
                Some(im) => Ok(im.clone()),
                None => p.re.zeros_like(),
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let im = Tensor::cat(&im, dim)?;
        Ok(Self { re, im: Some(im) })
    }

    /// Batched matrix product with identical leading dims
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        self.bilinear(rhs, |a, b| a.matmul(b))
    }

    /// Matrix product broadcasting the leading (batch) dims
    pub fn broadcast_matmul(&self, rhs: &Self) -> Result<Self> {
        self.bilinear(rhs, |a, b| a.broadcast_matmul(b))
    }

    /// Elementwise sum with broadcasting
    pub fn broadcast_add(&self, rhs: &Self) -> Result<Self> {
        self.additive(rhs, |a, b| a.broadcast_add(b))
    }

    /// Divide both parts by a real tensor, broadcasting
    pub fn broadcast_div_real(&self, rhs: &Tensor) -> Result<Self> {
        self.map(|t| t.broadcast_div(rhs))
    }

    /// Complex conjugate
    pub fn conj(&self) -> Result<Self> {
        let im = match &self.im {
            Some(im) => Some(im.neg()?),
            None => None,
        };
        Ok(Self {
            re: self.re.clone(),
            im,
        })
    }

    /// Transpose of the last two dims, materialized contiguously
    pub fn t(&self) -> Result<Self> {
        self.map(|x| x.t()?.contiguous())
    }

    /// Conjugate transpose of the last two dims
    pub fn conj_t(&self) -> Result<Self> {
        self.t()?.conj()
    }

    /// Elementwise squared magnitude `re^2 + im^2`, a real tensor
    pub fn abs_sq(&self) -> Result<Tensor> {
        let re_sq = self.re.sqr()?;
        match &self.im {
            Some(im) => Ok((re_sq + im.sqr()?)?),
            None => Ok(re_sq),
        }
    }

    /// Elementwise `log|z|`, a real tensor
    ///
    /// Computed as `log(max) + 0.5 log(1 + (min / max)^2)` over the absolute
    /// parts, so magnitudes whose square over- or underflows stay finite.
    /// Zero maps to `-inf`.
    pub fn log_abs(&self) -> Result<Tensor> {
        let re = self.re.abs()?;
        let im = match &self.im {
            Some(im) => im.abs()?,
            None => return Ok(re.log()?),
        };
        let big = re.maximum(&im)?;
        let small = re.minimum(&im)?;
        // 0 / 0 guard, log(big) already carries the -inf
        let guard = big.eq(0.0)?.to_dtype(big.dtype())?;
        let ratio = small.div(&big.add(&guard)?)?;
        let correction = ratio.sqr()?.affine(1.0, 1.0)?.log()?.affine(0.5, 0.0)?;
        Ok(big.log()?.add(&correction)?)
    }

    /// Frobenius norm over all elements, a real scalar tensor
    pub fn frobenius_norm(&self) -> Result<Tensor> {
        Ok(self.abs_sq()?.sum_all()?.sqrt()?)
    }
}
