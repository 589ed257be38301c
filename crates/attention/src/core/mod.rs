//! Core types shared across attention kernels.
//!
//! Kernels operate on tensors with layout `[batch, n_heads, seq_len, head_dim]`
//! unless documented otherwise. Reductions accumulate in `f32` regardless of
//! the incoming dtype (`bf16`, `f16`, or `f32`) and outputs are cast back to
//! the input dtype.

pub mod config;
pub mod errors;
pub mod shape;

pub use config::TileConfig;
pub use errors::AttentionError;
pub use shape::AttentionShape;
