//! Scaled-dot-product attention kernels for the benchmark harness.
//!
//! Two families live here. The [`reference`] kernels are straightforward
//! candle compositions that return a fresh output tensor; one of them consumes
//! the `[batch, seq_len, heads, head_dim]` layout and serves as ground truth.
//! The [`tiled`] kernels implement online-softmax attention over a
//! pre-transposed key and write into a caller-owned output buffer, the calling
//! convention of hand-written GPU kernels.
//!
//! Every kernel validates its inputs and reports contract violations as
//! [`AttentionError`] rather than panicking.

pub mod core;
pub mod reference;
pub mod tiled;

pub use core::{AttentionError, AttentionShape, TileConfig};
pub use reference::{exact_attention, seq_major_attention, unfused_attention, write_into};
pub use tiled::{split_kv, split_q, split_q_lse};
