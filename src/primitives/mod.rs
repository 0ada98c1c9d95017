//! Tensor primitives
//!
//! Device selection, host readback, and the split-complex tensor type the
//! MPS contractions are written against.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: device selection, GPU serialization, finiteness checks
//! - [`complex`]: [`CTensor`], a real tensor with an optional imaginary part

mod complex;
mod tensor_ops;

pub use complex::CTensor;
pub use tensor_ops::*;
