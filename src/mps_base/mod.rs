//! MPS Building Blocks
//!
//! The batched contraction routines a matrix product state model is built
//! from. Every routine operates on [`CTensor`](crate::primitives::CTensor)s
//! so real and complex parameters share one code path, and every routine is
//! composed of differentiable candle ops.
//!
//! ## Submodules
//!
//! - [`init`]: near-identity cores, edge vectors, random phases
//! - [`slices`]: per-site matrix selection for discrete or vector inputs
//! - [`contract`]: sequential and tree contraction of matrix sequences
//! - [`norm`]: log partition function via rescaled transfer matrices

mod contract;
mod init;
mod norm;
mod slices;

pub use contract::{contract_matseq, contract_matseq_scaled, ContractionMode};
pub use init::{edge_vec_init, near_eye_init, phaseify, DEFAULT_INIT_NOISE};
pub use norm::get_log_norm;
pub use slices::get_mat_slices;
