//! Model inputs

use crate::{MpsError, Result};
use candle_core::{DType, Device, Tensor};

/// A batch of fixed-length input sequences
///
/// Site-major layout: the first axis indexes sequence position, the second
/// the batch entry.
#[derive(Debug, Clone)]
pub enum MpsInput {
    /// Symbols of shape `(seq_len, batch)` with an integer dtype (`u8`, `u32`, `i64`)
    Discrete(Tensor),

    /// Feature vectors of shape `(seq_len, batch, input_dim)` with a float dtype
    Vectors(Tensor),
}

impl MpsInput {
    /// Wrap a `(seq_len, batch)` tensor of symbols
    pub fn discrete(ids: Tensor) -> Result<Self> {
        if ids.rank() != 2 {
            return Err(MpsError::Input(format!(
                "discrete input must have shape (seq_len, batch), got {:?}",
                ids.dims()
            )));
        }
        if !matches!(ids.dtype(), DType::U8 | DType::U32 | DType::I64) {
            return Err(MpsError::Input(format!(
                "discrete input must be u8, u32 or i64, got {:?}",
                ids.dtype()
            )));
        }
        Ok(Self::Discrete(ids))
    }

    /// Wrap a `(seq_len, batch, input_dim)` tensor of feature vectors
    pub fn vectors(vecs: Tensor) -> Result<Self> {
        if vecs.rank() != 3 {
            return Err(MpsError::Input(format!(
                "vector input must have shape (seq_len, batch, input_dim), got {:?}",
                vecs.dims()
            )));
        }
        if !vecs.dtype().is_float() {
            return Err(MpsError::Input(format!(
                "vector input must be floating point, got {:?}",
                vecs.dtype()
            )));
        }
        Ok(Self::Vectors(vecs))
    }

    /// Pick the input kind from the tensor rank
    pub fn from_tensor(tensor: Tensor) -> Result<Self> {
        match tensor.rank() {
            2 => Self::discrete(tensor),
            3 => Self::vectors(tensor),
            _ => Err(MpsError::Input(format!(
                "input must have rank 2 (discrete) or 3 (vectors), got {:?}",
                tensor.dims()
            ))),
        }
    }

    /// Build a discrete batch from batch-major host sequences
    ///
    /// ```rust,ignore
    /// let batch = MpsInput::from_sequences(&[vec![0, 1, 1], vec![1, 0, 0]], &device)?;
    /// assert_eq!(batch.batch_size(), 2);
    /// ```
    pub fn from_sequences(seqs: &[Vec<u32>], device: &Device) -> Result<Self> {
        let first = seqs
            .first()
            .ok_or_else(|| MpsError::Input("cannot build an empty batch".into()))?;
        let seq_len = first.len();
        if seq_len == 0 {
            return Err(MpsError::Input("sequences must be non-empty".into()));
        }
        if let Some(bad) = seqs.iter().position(|s| s.len() != seq_len) {
            return Err(MpsError::Input(format!(
                "sequence {} has length {}, expected {}",
                bad,
                seqs[bad].len(),
                seq_len
            )));
        }

        let batch = seqs.len();
        let data: Vec<u32> = (0..seq_len)
            .flat_map(|t| seqs.iter().map(move |s| s[t]))
            .collect();
        Self::discrete(Tensor::from_vec(data, (seq_len, batch), device)?)
    }

    /// The underlying tensor
    pub fn tensor(&self) -> &Tensor {
        match self {
            Self::Discrete(t) | Self::Vectors(t) => t,
        }
    }

    pub fn seq_len(&self) -> usize {
        self.tensor().dims()[0]
    }

    pub fn batch_size(&self) -> usize {
        self.tensor().dims()[1]
    }

    /// Sub-batch of `len` entries starting at `start`
    pub fn narrow_batch(&self, start: usize, len: usize) -> Result<Self> {
        match self {
            Self::Discrete(t) => Ok(Self::Discrete(t.narrow(1, start, len)?)),
            Self::Vectors(t) => Ok(Self::Vectors(t.narrow(1, start, len)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_from_sequences_is_site_major() {
        let input = MpsInput::from_sequences(&[vec![0, 1, 2], vec![3, 4, 5]], &device()).unwrap();
        assert_eq!(input.seq_len(), 3);
        assert_eq!(input.batch_size(), 2);
        assert_eq!(
            input.tensor().to_vec2::<u32>().unwrap(),
            vec![vec![0, 3], vec![1, 4], vec![2, 5]]
        );
    }

    #[test]
    fn test_from_sequences_rejects_ragged_and_empty() {
        assert!(MpsInput::from_sequences(&[], &device()).is_err());
        assert!(MpsInput::from_sequences(&[vec![]], &device()).is_err());
        assert!(MpsInput::from_sequences(&[vec![0, 1], vec![1]], &device()).is_err());
    }

    #[test]
    fn test_from_tensor_dispatches_on_rank() {
        let ids = Tensor::zeros((4, 2), DType::U32, &device()).unwrap();
        assert!(matches!(MpsInput::from_tensor(ids).unwrap(), MpsInput::Discrete(_)));

        let vecs = Tensor::zeros((4, 2, 3), DType::F32, &device()).unwrap();
        assert!(matches!(MpsInput::from_tensor(vecs).unwrap(), MpsInput::Vectors(_)));

        let bad = Tensor::zeros(4, DType::F32, &device()).unwrap();
        assert!(MpsInput::from_tensor(bad).is_err());
    }

    #[test]
    fn test_dtype_checks() {
        let float_ids = Tensor::zeros((4, 2), DType::F32, &device()).unwrap();
        assert!(MpsInput::discrete(float_ids).is_err());

        let int_vecs = Tensor::zeros((4, 2, 3), DType::U32, &device()).unwrap();
        assert!(MpsInput::vectors(int_vecs).is_err());
    }

    #[test]
    fn test_narrow_batch() {
        let seqs: Vec<Vec<u32>> = (0..5).map(|b| vec![b, b + 10]).collect();
        let input = MpsInput::from_sequences(&seqs, &device()).unwrap();
        let part = input.narrow_batch(1, 3).unwrap();

        assert_eq!(part.batch_size(), 3);
        assert_eq!(
            part.tensor().to_vec2::<u32>().unwrap(),
            vec![vec![1, 2, 3], vec![11, 12, 13]]
        );
    }
}
