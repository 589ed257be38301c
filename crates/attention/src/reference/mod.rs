//! Portable, exact implementations of scaled-dot-product attention.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline for validating the tiled kernels.

pub mod exact;

pub use exact::{exact_attention, seq_major_attention, unfused_attention, write_into};
